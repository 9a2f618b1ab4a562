//! Reference discovery and dereferencing.

use bson::oid::ObjectId;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, instrument};

use crate::connection::Database;
use crate::document::Document;
use crate::fields::FieldShape;
use crate::query::id_filter;
use crate::schema;
use crate::value::{Reference, Value};
use crate::Result;

/// Step of a path from a document to one of its nested values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// An unresolved reference found in a document
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSlot {
    /// Location of the reference value, starting at the document's fields
    pub path: Vec<PathSegment>,
    /// Registered name of the referenced schema
    pub target: String,
    pub id: ObjectId,
}

impl Document {
    /// Collect unresolved references.
    ///
    /// Depth 1 covers this document, its embedded documents and lists;
    /// each further level also walks documents already loaded through a
    /// reference.
    pub fn find_references(&self, depth: usize) -> Vec<ReferenceSlot> {
        let mut slots = Vec::new();
        if depth > 0 {
            collect_document(self, depth, &mut Vec::new(), &mut slots);
        }
        slots
    }

    /// Resolve references by identity and write the results back in place.
    ///
    /// A reference to a missing document becomes `Null`. With `depth > 1`
    /// the references of loaded documents are resolved too. Returns the
    /// number of documents fetched.
    pub fn load_references<'a>(
        &'a mut self,
        db: &'a Database,
        depth: usize,
    ) -> BoxFuture<'a, Result<usize>> {
        load_references_inner(self, db, depth).boxed()
    }

    fn value_at_mut(&mut self, path: &[PathSegment]) -> Option<&mut Value> {
        let (first, rest) = path.split_first()?;
        let mut current = match first {
            PathSegment::Field(name) => self.get_mut(name)?,
            PathSegment::Index(_) => return None,
        };
        for segment in rest {
            current = match (segment, current) {
                (PathSegment::Field(name), Value::Embedded(doc)) => doc.get_mut(name)?,
                (PathSegment::Field(name), Value::Reference(Reference::Loaded(doc))) => {
                    doc.get_mut(name)?
                }
                (PathSegment::Index(i), Value::List(items)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

#[instrument(skip(doc, db), fields(schema = doc.schema().name()))]
async fn load_references_inner(doc: &mut Document, db: &Database, depth: usize) -> Result<usize> {
    if depth == 0 {
        return Ok(0);
    }

    let mut fetched = 0;
    for slot in doc.find_references(1) {
        let target = schema::lookup(&slot.target)?;
        let found = db
            .storage()
            .find_one(target.collection(), id_filter(slot.id), None)
            .await?;

        let resolved = match found {
            Some(son) => {
                let mut loaded = Document::from_son(target, &son)?;
                fetched += 1;
                if depth > 1 {
                    fetched += loaded.load_references(db, depth - 1).await?;
                }
                Value::Reference(Reference::Loaded(Box::new(loaded)))
            }
            None => {
                debug!(schema = %slot.target, id = %slot.id, "referenced document not found");
                Value::Null
            }
        };

        if let Some(value) = doc.value_at_mut(&slot.path) {
            *value = resolved;
        }
    }
    Ok(fetched)
}

fn collect_document(
    doc: &Document,
    depth: usize,
    path: &mut Vec<PathSegment>,
    slots: &mut Vec<ReferenceSlot>,
) {
    for (name, field) in doc.schema().fields() {
        let Some(value) = doc.get(name) else {
            continue;
        };
        path.push(PathSegment::Field(name.to_string()));
        collect_value(field.shape(), value, depth, path, slots);
        path.pop();
    }
}

fn collect_value(
    shape: FieldShape<'_>,
    value: &Value,
    depth: usize,
    path: &mut Vec<PathSegment>,
    slots: &mut Vec<ReferenceSlot>,
) {
    match (shape, value) {
        (FieldShape::Reference(target), Value::Reference(Reference::Id(id))) => {
            slots.push(ReferenceSlot {
                path: path.clone(),
                target: target.to_string(),
                id: *id,
            });
        }
        (FieldShape::Reference(_), Value::Reference(Reference::Loaded(loaded))) if depth > 1 => {
            collect_document(loaded, depth - 1, path, slots);
        }
        (FieldShape::Embedded(_), Value::Embedded(embedded)) => {
            collect_document(embedded, depth, path, slots);
        }
        (FieldShape::List(item), Value::List(items)) => {
            for (i, element) in items.iter().enumerate() {
                path.push(PathSegment::Index(i));
                collect_value(item.shape(), element, depth, path, slots);
                path.pop();
            }
        }
        _ => {}
    }
}
