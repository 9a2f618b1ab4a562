//! Query filters and find requests.
//!
//! [`Q`] is a filter tree over schema attribute names. It is translated to a
//! native MongoDB filter document once, right before execution, using the
//! schema to map attribute names to storage keys and operands to their
//! storage representation. [`FindQuery`] carries a translated find request to
//! a storage backend.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document as BsonDocument};
use once_cell::sync::Lazy;
use std::ops::{BitAnd, BitOr, Not};

use crate::fields::{Field, FieldShape, ObjectIdField};
use crate::schema::Schema;
use crate::value::Value;
use crate::{OdmError, Result};

/// Identity pseudo-field used for `id` / `_id` lookups
static ID_FIELD: Lazy<ObjectIdField> = Lazy::new(ObjectIdField::new);

// =====================
// Operators
// =====================

/// Comparison operator of a filter leaf
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Exists,
    /// Regular expression match with optional flags (e.g. "i")
    Regex(Option<String>),
}

impl Operator {
    /// Parses a lookup suffix (`age__gt` → `gt`)
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "exact" => Some(Operator::Eq),
            "ne" => Some(Operator::Ne),
            "gt" => Some(Operator::Gt),
            "gte" => Some(Operator::Gte),
            "lt" => Some(Operator::Lt),
            "lte" => Some(Operator::Lte),
            "in" => Some(Operator::In),
            "nin" => Some(Operator::NotIn),
            "exists" => Some(Operator::Exists),
            "regex" => Some(Operator::Regex(None)),
            _ => None,
        }
    }

    /// MongoDB operator name
    pub fn as_mongo(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::NotIn => "$nin",
            Operator::Exists => "$exists",
            Operator::Regex(_) => "$regex",
        }
    }
}

/// Sort direction for `order_by`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_i32(self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }
}

// =====================
// Filter tree
// =====================

/// Filter expression over schema attributes
///
/// # Example
///
/// ```ignore
/// use motor_odm::query::Q;
///
/// let adults = Q::field("age").gte(18) & Q::field("name").ne("root");
/// let either = Q::lookup("age__lt", 10) | Q::lookup("age__gt", 90);
/// let not_admin = !Q::field("role").eq("admin");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    Node {
        field: String,
        op: Operator,
        value: Value,
    },
    And(Vec<Q>),
    Or(Vec<Q>),
    Not(Box<Q>),
    /// Native filter fragment, used as-is
    Raw(BsonDocument),
}

/// Leaf builder returned by [`Q::field`]
#[derive(Debug, Clone)]
pub struct FieldQ {
    name: String,
}

impl FieldQ {
    fn node(self, op: Operator, value: Value) -> Q {
        Q::Node {
            field: self.name,
            op,
            value,
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Q {
        self.node(Operator::Eq, value.into())
    }

    pub fn ne(self, value: impl Into<Value>) -> Q {
        self.node(Operator::Ne, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Q {
        self.node(Operator::Gt, value.into())
    }

    pub fn gte(self, value: impl Into<Value>) -> Q {
        self.node(Operator::Gte, value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Q {
        self.node(Operator::Lt, value.into())
    }

    pub fn lte(self, value: impl Into<Value>) -> Q {
        self.node(Operator::Lte, value.into())
    }

    pub fn is_in<T: Into<Value>>(self, values: Vec<T>) -> Q {
        self.node(Operator::In, Value::from(values))
    }

    pub fn not_in<T: Into<Value>>(self, values: Vec<T>) -> Q {
        self.node(Operator::NotIn, Value::from(values))
    }

    pub fn exists(self, exists: bool) -> Q {
        self.node(Operator::Exists, Value::Bool(exists))
    }

    pub fn regex(self, pattern: impl Into<String>) -> Q {
        self.node(Operator::Regex(None), Value::String(pattern.into()))
    }

    pub fn regex_with(self, pattern: impl Into<String>, options: impl Into<String>) -> Q {
        self.node(
            Operator::Regex(Some(options.into())),
            Value::String(pattern.into()),
        )
    }
}

impl Q {
    /// Start a leaf on an attribute name (dotted paths reach into embedded documents)
    pub fn field(name: impl Into<String>) -> FieldQ {
        FieldQ { name: name.into() }
    }

    /// Django-style lookup: `name`, `name__op` or `outer__inner__op`
    pub fn lookup(key: &str, value: impl Into<Value>) -> Q {
        let mut parts: Vec<&str> = key.split("__").collect();
        let op = match parts.last().and_then(|last| Operator::from_suffix(last)) {
            Some(op) if parts.len() > 1 => {
                parts.pop();
                op
            }
            _ => Operator::Eq,
        };
        Q::Node {
            field: parts.join("."),
            op,
            value: value.into(),
        }
    }

    pub fn raw(filter: BsonDocument) -> Q {
        Q::Raw(filter)
    }

    /// Translate to a MongoDB filter document
    pub fn to_query(&self, schema: &Schema) -> Result<BsonDocument> {
        match self {
            Q::Node { field, op, value } => translate_node(schema, field, op, value),
            Q::And(children) => {
                let mut merged = BsonDocument::new();
                for child in children {
                    merge_filter(&mut merged, child.to_query(schema)?);
                }
                Ok(merged)
            }
            Q::Or(children) => {
                let clauses = children
                    .iter()
                    .map(|child| child.to_query(schema).map(Bson::Document))
                    .collect::<Result<Vec<_>>>()?;
                Ok(doc! { "$or": clauses })
            }
            Q::Not(inner) => {
                let negated = inner.to_query(schema)?;
                Ok(doc! { "$nor": [negated] })
            }
            Q::Raw(filter) => Ok(filter.clone()),
        }
    }
}

impl BitAnd for Q {
    type Output = Q;

    fn bitand(self, rhs: Q) -> Q {
        match self {
            Q::And(mut children) => {
                children.push(rhs);
                Q::And(children)
            }
            lhs => Q::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Q {
    type Output = Q;

    fn bitor(self, rhs: Q) -> Q {
        match self {
            Q::Or(mut children) => {
                children.push(rhs);
                Q::Or(children)
            }
            lhs => Q::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for Q {
    type Output = Q;

    fn not(self) -> Q {
        Q::Not(Box::new(self))
    }
}

// =====================
// Translation
// =====================

/// Storage key of an attribute path and the field governing its operands
pub(crate) struct ResolvedPath<'a> {
    pub key: String,
    pub field: Option<&'a dyn Field>,
}

/// Resolve a dotted attribute path against `schema`
pub(crate) fn resolve_path<'a>(schema: &'a Schema, path: &str) -> Result<ResolvedPath<'a>> {
    let mut segments = path.split('.');
    let head = segments.next().unwrap_or_default();

    let (mut key, mut field): (String, Option<&'a dyn Field>) = match head {
        "id" | "_id" => ("_id".to_string(), Some(&*ID_FIELD as &dyn Field)),
        name => match schema.field(name) {
            Some(field) => (schema.storage_key(name).unwrap_or(name).to_string(), Some(field)),
            None => {
                return Err(OdmError::Query(format!(
                    "{} has no field '{}'",
                    schema.name(),
                    name
                )))
            }
        },
    };

    for segment in segments {
        key.push('.');
        let shape = field.map(|f| f.shape());
        let embedded = match shape {
            Some(FieldShape::Embedded(inner)) => Some(inner),
            Some(FieldShape::List(item)) => {
                if segment.chars().all(|c| c.is_ascii_digit()) {
                    // positional element keeps the item contract
                    key.push_str(segment);
                    field = Some(item);
                    continue;
                }
                match item.shape() {
                    FieldShape::Embedded(inner) => Some(inner),
                    _ => None,
                }
            }
            _ => None,
        };

        match embedded {
            Some(inner) => {
                let nested = inner.field(segment).ok_or_else(|| {
                    OdmError::Query(format!("{} has no field '{}'", inner.name(), segment))
                })?;
                key.push_str(inner.storage_key(segment).unwrap_or(segment));
                field = Some(nested);
            }
            None => {
                key.push_str(segment);
                field = None;
            }
        }
    }

    Ok(ResolvedPath { key, field })
}

/// Storage representation of an operand
pub(crate) fn operand_to_bson(field: Option<&dyn Field>, value: &Value) -> Result<Bson> {
    match field {
        Some(field) => match (field.shape(), value) {
            // scalar operand against a list field matches list members
            (FieldShape::List(item), v) if !matches!(v, Value::List(_)) => item.to_storage(v),
            _ => field.to_storage(value),
        },
        None => plain_bson(value),
    }
}

/// Field-independent BSON form of a value
pub(crate) fn plain_bson(value: &Value) -> Result<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::Decimal(d) => Bson::String(d.to_string()),
        Value::String(s) => Bson::String(s.clone()),
        Value::DateTime(dt) => {
            Bson::DateTime(bson::DateTime::from_millis(dt.and_utc().timestamp_millis()))
        }
        Value::Binary(bytes) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        Value::Uuid(u) => Bson::String(u.hyphenated().to_string()),
        Value::ObjectId(oid) => Bson::ObjectId(*oid),
        Value::Json(json) => bson::to_bson(json)?,
        Value::List(items) => Bson::Array(items.iter().map(plain_bson).collect::<Result<_>>()?),
        Value::Embedded(doc) => Bson::Document(doc.to_son()?),
        Value::Reference(reference) => reference
            .id()
            .map(Bson::ObjectId)
            .unwrap_or(Bson::Null),
    })
}

fn translate_node(
    schema: &Schema,
    path: &str,
    op: &Operator,
    value: &Value,
) -> Result<BsonDocument> {
    let resolved = resolve_path(schema, path)?;
    let field = resolved.field;

    let condition = match op {
        Operator::Eq => operand_to_bson(field, value)?,
        Operator::In | Operator::NotIn => {
            let items = value.as_list().ok_or_else(|| {
                OdmError::Query(format!(
                    "'{}' on '{}' expects a list, got {}",
                    op.as_mongo(),
                    path,
                    value.type_name()
                ))
            })?;
            let converted = items
                .iter()
                .map(|item| operand_to_bson(field, item))
                .collect::<Result<Vec<_>>>()?;
            operator_document(op, Bson::Array(converted))
        }
        Operator::Exists => Bson::Document(doc! { "$exists": value.as_bool().unwrap_or(true) }),
        Operator::Regex(options) => {
            let pattern = value.as_str().ok_or_else(|| {
                OdmError::Query(format!("'$regex' on '{}' expects text", path))
            })?;
            let mut condition = doc! { "$regex": pattern };
            if let Some(options) = options {
                condition.insert("$options", options.as_str());
            }
            Bson::Document(condition)
        }
        _ => operator_document(op, operand_to_bson(field, value)?),
    };

    let mut filter = BsonDocument::new();
    filter.insert(resolved.key, condition);
    Ok(filter)
}

fn operator_document(op: &Operator, operand: Bson) -> Bson {
    let mut condition = BsonDocument::new();
    condition.insert(op.as_mongo(), operand);
    Bson::Document(condition)
}

fn is_operator_document(bson: &Bson) -> bool {
    match bson {
        Bson::Document(doc) => !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Merge `next` into `into`; later conditions on the same key and operator win
fn merge_filter(into: &mut BsonDocument, next: BsonDocument) {
    for (key, condition) in next {
        let existing = match into.remove(&key) {
            Some(existing) => existing,
            None => {
                into.insert(key, condition);
                continue;
            }
        };

        if key.starts_with('$') {
            // two logical clauses of the same kind: keep both under $and
            let mut clauses = match into.remove("$and") {
                Some(Bson::Array(clauses)) => clauses,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            if key == "$and" {
                for value in [existing, condition] {
                    match value {
                        Bson::Array(items) => clauses.extend(items),
                        other => clauses.push(other),
                    }
                }
            } else {
                let mut first = BsonDocument::new();
                first.insert(key.clone(), existing);
                let mut second = BsonDocument::new();
                second.insert(key, condition);
                clauses.push(Bson::Document(first));
                clauses.push(Bson::Document(second));
            }
            into.insert("$and", clauses);
            continue;
        }

        let merged = match (is_operator_document(&existing), is_operator_document(&condition)) {
            (false, false) => condition,
            (existing_ops, new_ops) => {
                let mut ops = match existing {
                    Bson::Document(doc) if existing_ops => doc,
                    other => doc! { "$eq": other },
                };
                match condition {
                    Bson::Document(doc) if new_ops => ops.extend(doc),
                    other => {
                        ops.insert("$eq", other);
                    }
                }
                Bson::Document(ops)
            }
        };
        into.insert(key, merged);
    }
}

/// Filter matching a document identity
pub(crate) fn id_filter(id: ObjectId) -> BsonDocument {
    doc! { "_id": id }
}

// =====================
// Find request
// =====================

/// Translated find request for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    collection: String,
    filter: BsonDocument,
    projection: Option<BsonDocument>,
    sort: Option<BsonDocument>,
    skip: Option<u64>,
    limit: Option<i64>,
}

impl FindQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: BsonDocument::new(),
            projection: None,
            sort: None,
            skip: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: BsonDocument) -> Self {
        self.filter = filter;
        self
    }

    /// Restrict returned keys (`{key: 1}` or `{key: 0}`)
    pub fn projection(mut self, projection: BsonDocument) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: BsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn get_filter(&self) -> &BsonDocument {
        &self.filter
    }

    pub fn get_projection(&self) -> Option<&BsonDocument> {
        self.projection.as_ref()
    }

    pub fn get_sort(&self) -> Option<&BsonDocument> {
        self.sort.as_ref()
    }

    pub fn get_skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn get_limit(&self) -> Option<i64> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{DateTimeField, EmbeddedDocumentField, IntField, ListField, StringField};
    use crate::schema::SchemaBuilder;
    use std::sync::Arc;

    fn user_schema() -> Arc<Schema> {
        let address = SchemaBuilder::new("QueryAddress")
            .field("city", StringField::new().db_field("c"))
            .build()
            .unwrap();
        SchemaBuilder::new("QueryUser")
            .field("name", StringField::new().db_field("n"))
            .field("age", IntField::new())
            .field("tags", ListField::new(StringField::new()))
            .field("address", EmbeddedDocumentField::new(address))
            .field("joined", DateTimeField::new())
            .build()
            .unwrap()
    }

    #[test]
    fn test_equality_uses_storage_key() {
        let schema = user_schema();
        let filter = Q::field("name").eq("Bernardo").to_query(&schema).unwrap();
        assert_eq!(filter, doc! { "n": "Bernardo" });
    }

    #[test]
    fn test_comparison_operators() {
        let schema = user_schema();
        assert_eq!(
            Q::field("age").gt(18).to_query(&schema).unwrap(),
            doc! { "age": { "$gt": 18_i64 } }
        );
        assert_eq!(
            Q::lookup("age__lte", 30).to_query(&schema).unwrap(),
            doc! { "age": { "$lte": 30_i64 } }
        );
        assert_eq!(
            Q::lookup("name__ne", "x").to_query(&schema).unwrap(),
            doc! { "n": { "$ne": "x" } }
        );
    }

    #[test]
    fn test_in_converts_each_operand() {
        let schema = user_schema();
        assert_eq!(
            Q::field("age").is_in(vec![1, 2]).to_query(&schema).unwrap(),
            doc! { "age": { "$in": [1_i64, 2_i64] } }
        );
        assert_eq!(
            Q::field("age").not_in(vec![3]).to_query(&schema).unwrap(),
            doc! { "age": { "$nin": [3_i64] } }
        );

        let scalar = Q::Node {
            field: "age".to_string(),
            op: Operator::In,
            value: Value::Int(1),
        };
        assert!(scalar.to_query(&schema).is_err());
    }

    #[test]
    fn test_exists_and_regex_pass_through() {
        let schema = user_schema();
        assert_eq!(
            Q::field("name").exists(false).to_query(&schema).unwrap(),
            doc! { "n": { "$exists": false } }
        );
        assert_eq!(
            Q::field("name").regex_with("^ber", "i").to_query(&schema).unwrap(),
            doc! { "n": { "$regex": "^ber", "$options": "i" } }
        );
    }

    #[test]
    fn test_and_merges_operators_last_wins() {
        let schema = user_schema();
        let q = Q::field("age").gt(10) & Q::field("age").lt(50) & Q::field("age").gt(20);
        assert_eq!(
            q.to_query(&schema).unwrap(),
            doc! { "age": { "$gt": 20_i64, "$lt": 50_i64 } }
        );
    }

    #[test]
    fn test_and_equality_merges_as_eq() {
        let schema = user_schema();
        let q = Q::field("age").eq(20) & Q::field("age").lt(50);
        assert_eq!(
            q.to_query(&schema).unwrap(),
            doc! { "age": { "$eq": 20_i64, "$lt": 50_i64 } }
        );

        let q = Q::field("age").eq(20) & Q::field("age").eq(21);
        assert_eq!(q.to_query(&schema).unwrap(), doc! { "age": 21_i64 });
    }

    #[test]
    fn test_or_and_not() {
        let schema = user_schema();
        let q = Q::field("age").lt(10) | Q::field("age").gt(90);
        assert_eq!(
            q.to_query(&schema).unwrap(),
            doc! { "$or": [ { "age": { "$lt": 10_i64 } }, { "age": { "$gt": 90_i64 } } ] }
        );

        let q = !Q::field("name").eq("root");
        assert_eq!(q.to_query(&schema).unwrap(), doc! { "$nor": [ { "n": "root" } ] });
    }

    #[test]
    fn test_repeated_logical_clauses_keep_both() {
        let schema = user_schema();
        let first = Q::field("age").lt(10) | Q::field("age").gt(90);
        let second = Q::field("name").eq("a") | Q::field("name").eq("b");
        let filter = (first & second).to_query(&schema).unwrap();
        let clauses = filter.get_array("$and").unwrap();
        assert_eq!(clauses.len(), 2);
        assert!(!filter.contains_key("$or"));
    }

    #[test]
    fn test_nested_paths() {
        let schema = user_schema();
        assert_eq!(
            Q::lookup("address__city", "Rio").to_query(&schema).unwrap(),
            doc! { "address.c": "Rio" }
        );
        assert_eq!(
            Q::field("tags").eq("rust").to_query(&schema).unwrap(),
            doc! { "tags": "rust" }
        );
        assert!(Q::field("address.zip").eq(1).to_query(&schema).is_err());
    }

    #[test]
    fn test_identity_lookup() {
        let schema = user_schema();
        let id = ObjectId::new();
        assert_eq!(
            Q::field("id").eq(id).to_query(&schema).unwrap(),
            doc! { "_id": id }
        );
        assert_eq!(
            Q::field("_id").eq(id.to_hex()).to_query(&schema).unwrap(),
            doc! { "_id": id }
        );
    }

    #[test]
    fn test_unknown_field_is_query_error() {
        let schema = user_schema();
        let err = Q::field("missing").eq(1).to_query(&schema).unwrap_err();
        assert!(matches!(err, OdmError::Query(_)));
    }

    #[test]
    fn test_raw_fragment() {
        let schema = user_schema();
        let raw = doc! { "n": { "$type": "string" } };
        assert_eq!(Q::raw(raw.clone()).to_query(&schema).unwrap(), raw);
    }

    #[test]
    fn test_find_query_builder() {
        let filter = doc! { "active": true };
        let sort = doc! { "name": 1 };

        let query = FindQuery::new("users")
            .filter(filter.clone())
            .projection(doc! { "name": 1 })
            .sort(sort.clone())
            .skip(5)
            .limit(10);

        assert_eq!(query.collection_name(), "users");
        assert_eq!(query.get_filter(), &filter);
        assert_eq!(query.get_projection(), Some(&doc! { "name": 1 }));
        assert_eq!(query.get_sort(), Some(&sort));
        assert_eq!(query.get_skip(), Some(5));
        assert_eq!(query.get_limit(), Some(10));
    }

    #[test]
    fn test_find_query_defaults() {
        let query = FindQuery::new("users");
        assert!(query.get_filter().is_empty());
        assert!(query.get_projection().is_none());
        assert!(query.get_sort().is_none());
        assert!(query.get_skip().is_none());
        assert!(query.get_limit().is_none());
    }
}
