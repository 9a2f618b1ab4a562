//! In-process backend
//!
//! Collections live in memory behind a `RwLock`. Filters, projections,
//! sorts and `$set`/`$unset` updates use MongoDB syntax, and unique indexes
//! report duplicates with driver-shaped `E11000` messages, so the
//! persistence core behaves the same against this backend as against a
//! server.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document as BsonDocument};
use parking_lot::RwLock;
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{Connector, IndexSpec, StorageClient, StorageDatabase, UpdateOutcome};
use crate::connection::ConnectionSettings;
use crate::query::FindQuery;
use crate::{OdmError, Result};

type Databases = Arc<RwLock<HashMap<String, Arc<MemoryDatabase>>>>;

/// Opens clients sharing one in-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    databases: Databases,
    failure: Option<String>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose every open fails with `cause`
    pub fn failing(cause: impl Into<String>) -> Self {
        Self {
            databases: Databases::default(),
            failure: Some(cause.into()),
        }
    }
}

impl Connector for MemoryConnector {
    fn open(&self, alias: &str, _settings: &ConnectionSettings) -> Result<Arc<dyn StorageClient>> {
        if let Some(cause) = &self.failure {
            return Err(OdmError::connection(alias, cause));
        }
        Ok(Arc::new(MemoryClient {
            databases: self.databases.clone(),
        }))
    }
}

/// Client over the connector's store
#[derive(Debug, Clone)]
pub struct MemoryClient {
    databases: Databases,
}

impl StorageClient for MemoryClient {
    fn database(&self, name: &str) -> Arc<dyn StorageDatabase> {
        let mut databases = self.databases.write();
        let database = databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDatabase::new(name)))
            .clone();
        database
    }
}

#[derive(Debug, Default)]
struct MemoryCollection {
    docs: Vec<BsonDocument>,
    indexes: Vec<IndexSpec>,
}

impl MemoryCollection {
    /// Returns a duplicate-key error if `doc` collides with another document
    /// (other than position `skip`) on a unique index
    fn check_unique(
        &self,
        db: &str,
        collection: &str,
        doc: &BsonDocument,
        skip: Option<usize>,
    ) -> Result<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let value = lookup_path(doc, &index.key);
            if value.is_none() && index.sparse {
                continue;
            }
            let value = value.unwrap_or(Bson::Null);
            let clash = self.docs.iter().enumerate().any(|(position, other)| {
                if Some(position) == skip {
                    return false;
                }
                match lookup_path(other, &index.key) {
                    Some(existing) => values_equal(&existing, &value),
                    None => !index.sparse && value == Bson::Null,
                }
            });
            if clash {
                return Err(OdmError::DuplicateKey(format!(
                    "E11000 duplicate key error collection: {}.{} index: {} dup key: {{ {}: {} }}",
                    db,
                    collection,
                    index.name(),
                    index.key,
                    value
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, db: &str, collection: &str, mut doc: BsonDocument) -> Result<Bson> {
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = BsonDocument::new();
                with_id.insert("_id", id.clone());
                with_id.extend(doc);
                doc = with_id;
                id
            }
        };

        if self.docs.iter().any(|other| other.get("_id") == Some(&id)) {
            return Err(OdmError::DuplicateKey(format!(
                "E11000 duplicate key error collection: {}.{} index: _id_ dup key: {{ _id: {} }}",
                db, collection, id
            )));
        }
        self.check_unique(db, collection, &doc, None)?;
        self.docs.push(doc);
        Ok(id)
    }

    fn matching(&self, filter: &BsonDocument) -> Result<Vec<usize>> {
        let mut positions = Vec::new();
        for (position, doc) in self.docs.iter().enumerate() {
            if matches_filter(doc, filter)? {
                positions.push(position);
            }
        }
        Ok(positions)
    }
}

/// One in-memory database
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop every collection
    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

#[async_trait]
impl StorageDatabase for MemoryDatabase {
    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        projection: Option<BsonDocument>,
    ) -> Result<Option<BsonDocument>> {
        let collections = self.collections.read();
        let Some(coll) = collections.get(collection) else {
            return Ok(None);
        };
        for doc in &coll.docs {
            if matches_filter(doc, &filter)? {
                return Ok(Some(match &projection {
                    Some(projection) => project(doc, projection),
                    None => doc.clone(),
                }));
            }
        }
        Ok(None)
    }

    async fn find(&self, query: FindQuery) -> Result<Vec<BsonDocument>> {
        let collections = self.collections.read();
        let Some(coll) = collections.get(query.collection_name()) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<&BsonDocument> = Vec::new();
        for doc in &coll.docs {
            if matches_filter(doc, query.get_filter())? {
                found.push(doc);
            }
        }

        if let Some(sort) = query.get_sort() {
            found.sort_by(|a, b| compare_for_sort(a, b, sort));
        }

        let skip = query.get_skip().unwrap_or(0) as usize;
        let limit = match query.get_limit() {
            Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
            _ => usize::MAX,
        };

        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| match query.get_projection() {
                Some(projection) => project(doc, projection),
                None => doc.clone(),
            })
            .collect())
    }

    async fn insert_one(&self, collection: &str, doc: BsonDocument) -> Result<Bson> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        coll.insert(&self.name, collection, doc)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            ids.push(coll.insert(&self.name, collection, doc)?);
        }
        Ok(ids)
    }

    async fn replace_one(&self, collection: &str, id: ObjectId, doc: BsonDocument) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let target = Bson::ObjectId(id);
        let Some(position) = coll.docs.iter().position(|d| d.get("_id") == Some(&target)) else {
            return Ok(0);
        };

        let mut replacement = BsonDocument::new();
        replacement.insert("_id", target);
        replacement.extend(doc.into_iter().filter(|(key, _)| key != "_id"));

        coll.check_unique(&self.name, collection, &replacement, Some(position))?;
        coll.docs[position] = replacement;
        Ok(1)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(UpdateOutcome {
                count: 0,
                updated_existing: false,
            });
        };

        let positions = coll.matching(&filter)?;
        for &position in &positions {
            let mut updated = coll.docs[position].clone();
            apply_update(&mut updated, &update)?;
            coll.check_unique(&self.name, collection, &updated, Some(position))?;
            coll.docs[position] = updated;
        }

        let count = positions.len() as u64;
        Ok(UpdateOutcome {
            count,
            updated_existing: count > 0,
        })
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match coll.matching(&filter)?.first() {
            Some(&position) => {
                coll.docs.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let positions = coll.matching(&filter)?;
        for &position in positions.iter().rev() {
            coll.docs.remove(position);
        }
        Ok(positions.len() as u64)
    }

    async fn count(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let collections = self.collections.read();
        match collections.get(collection) {
            Some(coll) => Ok(coll.matching(&filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<String> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        let name = index.name();

        if let Some(existing) = coll.indexes.iter().find(|existing| existing.key == index.key) {
            if *existing != index {
                return Err(OdmError::Database(format!(
                    "Index with name: {} already exists with different options",
                    name
                )));
            }
            return Ok(name);
        }

        let previous = std::mem::take(&mut coll.indexes);
        coll.indexes = vec![index.clone()];
        let docs = std::mem::take(&mut coll.docs);
        let mut violation = None;
        for doc in docs {
            if violation.is_none() {
                if let Err(e) = coll.check_unique(&self.name, collection, &doc, None) {
                    violation = Some(e);
                }
            }
            coll.docs.push(doc);
        }
        coll.indexes = previous;

        if let Some(e) = violation {
            return Err(e);
        }
        debug!(db = %self.name, collection, index = %name, "created index");
        coll.indexes.push(index);
        Ok(name)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// =====================
// Paths
// =====================

/// Value at a dotted path; arrays are indexed by position or mapped over
fn lookup_path(doc: &BsonDocument, path: &str) -> Option<Bson> {
    let mut segments = path.split('.');
    let head = segments.next()?;
    let mut current = doc.get(head)?.clone();
    for segment in segments {
        current = step(&current, segment)?;
    }
    Some(current)
}

fn step(value: &Bson, segment: &str) -> Option<Bson> {
    match value {
        Bson::Document(doc) => doc.get(segment).cloned(),
        Bson::Array(items) => match segment.parse::<usize>() {
            Ok(index) => items.get(index).cloned(),
            Err(_) => {
                let mapped: Vec<Bson> = items
                    .iter()
                    .filter_map(|item| step(item, segment))
                    .collect();
                if mapped.is_empty() {
                    None
                } else {
                    Some(Bson::Array(mapped))
                }
            }
        },
        _ => None,
    }
}

fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, BsonDocument::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(OdmError::Query(format!(
                    "Cannot create field '{}' in element {{{}: ...}}",
                    rest, head
                ))),
            }
        }
    }
}

fn unset_path(doc: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn apply_update(doc: &mut BsonDocument, update: &BsonDocument) -> Result<()> {
    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            other => {
                return Err(OdmError::Query(format!(
                    "Modifiers operate on fields but found {} instead",
                    other
                )))
            }
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(doc, path);
                }
            }
            other => {
                return Err(OdmError::Query(format!(
                    "Unsupported update operator: {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn project(doc: &BsonDocument, projection: &BsonDocument) -> BsonDocument {
    let include = projection
        .iter()
        .any(|(key, flag)| key != "_id" && truthy(flag));
    let keep_id = projection.get("_id").map(truthy).unwrap_or(true);

    let mut out = BsonDocument::new();
    for (key, value) in doc {
        let listed = projection
            .iter()
            .any(|(path, _)| path == key || path.split('.').next() == Some(key.as_str()));
        let keep = if key == "_id" {
            keep_id
        } else if include {
            listed
        } else {
            !listed
        };
        if keep {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

// =====================
// Filter evaluation
// =====================

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (Bson::Array(x), Bson::Array(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
            }
            (Bson::Document(x), Bson::Document(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(key, value)| {
                        y.get(key).map(|other| values_equal(value, other)).unwrap_or(false)
                    })
            }
            _ => a == b,
        },
    }
}

fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_for_sort(a: &BsonDocument, b: &BsonDocument, sort: &BsonDocument) -> Ordering {
    for (path, direction) in sort {
        let ordering = match (lookup_path(a, path), lookup_path(b, path)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(Ordering::Equal),
        };
        let ordering = if as_f64(direction).map(|d| d < 0.0).unwrap_or(false) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Evaluate a MongoDB filter document against `doc`
pub(crate) fn matches_filter(doc: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => clauses(key, condition)?
                .iter()
                .map(|clause| matches_filter(doc, clause))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .all(|m| m),
            "$or" => clauses(key, condition)?
                .iter()
                .map(|clause| matches_filter(doc, clause))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .any(|m| m),
            "$nor" => !clauses(key, condition)?
                .iter()
                .map(|clause| matches_filter(doc, clause))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .any(|m| m),
            op if op.starts_with('$') => {
                return Err(OdmError::Query(format!(
                    "unknown top level operator: {}",
                    op
                )))
            }
            path => matches_condition(lookup_path(doc, path).as_ref(), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, condition: &'a Bson) -> Result<Vec<&'a BsonDocument>> {
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::Document(doc) => Ok(doc),
                _ => Err(OdmError::Query(format!("{} entries must be objects", op))),
            })
            .collect(),
        _ => Err(OdmError::Query(format!("{} must be a nonempty array", op))),
    }
}

fn is_operator_document(condition: &Bson) -> bool {
    match condition {
        Bson::Document(doc) => doc.keys().next().map(|k| k.starts_with('$')).unwrap_or(false),
        _ => false,
    }
}

fn equality(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(Bson::Array(items)) if !matches!(target, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, target))
        }
        Some(value) => values_equal(value, target),
    }
}

fn any_element(value: Option<&Bson>, predicate: impl Fn(&Bson) -> bool) -> bool {
    match value {
        Some(Bson::Array(items)) => items.iter().any(|item| predicate(item)),
        Some(value) => predicate(value),
        None => false,
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    let operators = match condition {
        Bson::Document(ops) if is_operator_document(condition) => ops,
        Bson::RegularExpression(regex) => {
            return regex_matches(value, &regex.pattern, &regex.options);
        }
        literal => return Ok(equality(value, literal)),
    };

    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$eq" => equality(value, operand),
            "$ne" => !equality(value, operand),
            "$gt" => any_element(value, |v| compare_values(v, operand) == Some(Ordering::Greater)),
            "$gte" => any_element(value, |v| {
                matches!(compare_values(v, operand), Some(Ordering::Greater | Ordering::Equal))
            }),
            "$lt" => any_element(value, |v| compare_values(v, operand) == Some(Ordering::Less)),
            "$lte" => any_element(value, |v| {
                matches!(compare_values(v, operand), Some(Ordering::Less | Ordering::Equal))
            }),
            "$in" => in_list(op, value, operand)?,
            "$nin" => !in_list(op, value, operand)?,
            "$exists" => value.is_some() == truthy(operand),
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or("");
                match operand {
                    Bson::String(pattern) => regex_matches(value, pattern, options)?,
                    Bson::RegularExpression(regex) => {
                        regex_matches(value, &regex.pattern, &regex.options)?
                    }
                    _ => return Err(OdmError::Query("$regex has to be a string".to_string())),
                }
            }
            "$options" => true,
            "$not" => !matches_condition(value, operand)?,
            other => return Err(OdmError::Query(format!("unknown operator: {}", other))),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(op: &str, value: Option<&Bson>, operand: &Bson) -> Result<bool> {
    match operand {
        Bson::Array(items) => Ok(items.iter().any(|item| equality(value, item))),
        _ => Err(OdmError::Query(format!("{} needs an array", op))),
    }
}

fn regex_matches(value: Option<&Bson>, pattern: &str, options: &str) -> Result<bool> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| OdmError::Query(format!("invalid $regex: {}", e)))?;
    Ok(any_element(value, |v| match v {
        Bson::String(s) => regex.is_match(s),
        _ => false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn people() -> Vec<BsonDocument> {
        vec![
            doc! { "name": "ann", "age": 31_i64, "tags": ["a", "b"], "address": { "city": "Rio" } },
            doc! { "name": "bob", "age": 25, "tags": ["b"] },
            doc! { "name": "cid", "age": 40.0, "nick": null },
        ]
    }

    fn names(filter: BsonDocument) -> Vec<String> {
        people()
            .iter()
            .filter(|doc| matches_filter(doc, &filter).unwrap())
            .map(|doc| doc.get_str("name").unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_equality_and_comparison() {
        assert_eq!(names(doc! { "name": "bob" }), vec!["bob"]);
        assert_eq!(names(doc! { "age": { "$gt": 30 } }), vec!["ann", "cid"]);
        assert_eq!(names(doc! { "age": { "$gte": 25, "$lt": 40 } }), vec!["ann", "bob"]);
        assert_eq!(names(doc! { "age": 40 }), vec!["cid"]);
        assert_eq!(names(doc! { "name": { "$ne": "bob" } }), vec!["ann", "cid"]);
    }

    #[test]
    fn test_membership_and_arrays() {
        assert_eq!(names(doc! { "name": { "$in": ["ann", "cid"] } }), vec!["ann", "cid"]);
        assert_eq!(names(doc! { "name": { "$nin": ["ann"] } }), vec!["bob", "cid"]);
        assert_eq!(names(doc! { "tags": "b" }), vec!["ann", "bob"]);
        assert_eq!(names(doc! { "tags": { "$in": ["a"] } }), vec!["ann"]);
    }

    #[test]
    fn test_exists_and_null() {
        assert_eq!(names(doc! { "nick": { "$exists": true } }), vec!["cid"]);
        assert_eq!(names(doc! { "address": { "$exists": false } }), vec!["bob", "cid"]);
        assert_eq!(names(doc! { "nick": null }), vec!["ann", "bob", "cid"]);
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(
            names(doc! { "$or": [ { "name": "ann" }, { "age": { "$lt": 30 } } ] }),
            vec!["ann", "bob"]
        );
        assert_eq!(names(doc! { "$nor": [ { "name": "ann" } ] }), vec!["bob", "cid"]);
        assert_eq!(
            names(doc! { "$and": [ { "age": { "$gt": 20 } }, { "tags": "a" } ] }),
            vec!["ann"]
        );
        assert_eq!(names(doc! { "age": { "$not": { "$gt": 30 } } }), vec!["bob"]);
    }

    #[test]
    fn test_regex_and_dotted_paths() {
        assert_eq!(names(doc! { "name": { "$regex": "^A", "$options": "i" } }), vec!["ann"]);
        assert_eq!(names(doc! { "address.city": "Rio" }), vec!["ann"]);
    }

    #[test]
    fn test_unknown_operator_is_error() {
        let doc = doc! { "a": 1 };
        assert!(matches_filter(&doc, &doc! { "a": { "$where": "1" } }).is_err());
        assert!(matches_filter(&doc, &doc! { "$where": "1" }).is_err());
    }

    #[test]
    fn test_projection() {
        let doc = doc! { "_id": 1, "name": "ann", "age": 3 };
        assert_eq!(project(&doc, &doc! { "name": 1 }), doc! { "_id": 1, "name": "ann" });
        assert_eq!(project(&doc, &doc! { "age": 0 }), doc! { "_id": 1, "name": "ann" });
        assert_eq!(project(&doc, &doc! { "name": 1, "_id": 0 }), doc! { "name": "ann" });
    }

    #[test]
    fn test_set_update() {
        let mut doc = doc! { "name": "ann", "address": { "city": "Rio" } };
        apply_update(&mut doc, &doc! { "$set": { "name": "bea", "address.zip": "1" } }).unwrap();
        assert_eq!(doc, doc! { "name": "bea", "address": { "city": "Rio", "zip": "1" } });
        apply_update(&mut doc, &doc! { "$unset": { "address": "" } }).unwrap();
        assert_eq!(doc, doc! { "name": "bea" });
        assert!(apply_update(&mut doc, &doc! { "$push": { "a": 1 } }).is_err());
    }

    #[tokio::test]
    async fn test_crud_and_sort() {
        let db = MemoryDatabase::new("test");
        let ids = db.insert_many("people", people()).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| matches!(id, Bson::ObjectId(_))));

        let query = FindQuery::new("people")
            .sort(doc! { "age": -1 })
            .skip(1)
            .limit(1)
            .projection(doc! { "name": 1, "_id": 0 });
        assert_eq!(db.find(query).await.unwrap(), vec![doc! { "name": "ann" }]);

        assert_eq!(db.count("people", doc! {}).await.unwrap(), 3);
        let outcome = db
            .update_many(
                "people",
                doc! { "age": { "$lt": 35 } },
                doc! { "$set": { "young": true } },
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { count: 2, updated_existing: true });
        assert_eq!(db.count("people", doc! { "young": true }).await.unwrap(), 2);

        assert_eq!(db.delete_one("people", doc! { "name": "ann" }).await.unwrap(), 1);
        assert_eq!(db.delete_many("people", doc! {}).await.unwrap(), 2);
        assert_eq!(db.count("missing", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_keeps_identity() {
        let db = MemoryDatabase::new("test");
        let id = db.insert_one("c", doc! { "a": 1 }).await.unwrap();
        let oid = id.as_object_id().unwrap();
        assert_eq!(db.replace_one("c", oid, doc! { "a": 2 }).await.unwrap(), 1);
        let found = db.find_one("c", doc! { "_id": oid }, None).await.unwrap().unwrap();
        assert_eq!(found, doc! { "_id": oid, "a": 2 });
        assert_eq!(db.replace_one("c", ObjectId::new(), doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_index() {
        let db = MemoryDatabase::new("test");
        let index = IndexSpec { key: "email".into(), unique: true, sparse: false };
        assert_eq!(db.create_index("users", index.clone()).await.unwrap(), "email_1");
        assert_eq!(db.create_index("users", index).await.unwrap(), "email_1");

        db.insert_one("users", doc! { "email": "a@b.com" }).await.unwrap();
        let err = db.insert_one("users", doc! { "email": "a@b.com" }).await.unwrap_err();
        match &err {
            OdmError::DuplicateKey(message) => {
                assert!(message.contains("index: email_1 dup key: { email: \"a@b.com\" }"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(db.count("users", doc! {}).await.unwrap(), 1);

        let violation = err.into_unique_violation("User");
        assert!(matches!(
            violation,
            OdmError::UniqueKeyViolation { ref index, .. } if index == "email_1"
        ));
    }

    #[tokio::test]
    async fn test_sparse_unique_index_skips_missing() {
        let db = MemoryDatabase::new("test");
        let index = IndexSpec { key: "nick".into(), unique: true, sparse: true };
        db.create_index("users", index).await.unwrap();
        db.insert_one("users", doc! { "name": "a" }).await.unwrap();
        db.insert_one("users", doc! { "name": "b" }).await.unwrap();
        db.insert_one("users", doc! { "nick": "x" }).await.unwrap();
        assert!(db.insert_one("users", doc! { "nick": "x" }).await.is_err());
    }

    #[tokio::test]
    async fn test_create_unique_index_over_duplicates_fails() {
        let db = MemoryDatabase::new("test");
        db.insert_one("users", doc! { "email": "x" }).await.unwrap();
        db.insert_one("users", doc! { "email": "x" }).await.unwrap();
        let index = IndexSpec { key: "email".into(), unique: true, sparse: false };
        assert!(db.create_index("users", index).await.is_err());
        // the failed index is not kept
        db.insert_one("users", doc! { "email": "x" }).await.unwrap();
    }
}
