//! Record lookup and merging inside cached collection payloads.
//!
//! A collection payload is either a bare JSON array of records or an object
//! holding that array under a records field.

use serde_json::{Map, Value};

/// Property carrying a record's own expiration inside a collection payload.
pub const RECORD_EXPIRY_FIELD: &str = "_ts";

/// The record array of a collection payload.
pub fn records<'a>(payload: &'a Value, field: Option<&str>) -> Option<&'a Vec<Value>> {
  match field {
    Some(field) => payload.get(field)?.as_array(),
    None => payload.as_array(),
  }
}

fn records_mut<'a>(payload: &'a mut Value, field: Option<&str>) -> Option<&'a mut Vec<Value>> {
  match field {
    Some(field) => payload.get_mut(field)?.as_array_mut(),
    None => payload.as_array_mut(),
  }
}

/// Find the record whose identity attribute equals `id`.
pub fn find_record(payload: &Value, field: Option<&str>, id_attribute: &str, id: &Value) -> Option<Value> {
  records(payload, field)?
    .iter()
    .find(|record| record.get(id_attribute) == Some(id))
    .cloned()
}

/// Merge a model record into a collection payload.
///
/// A record with the same identity is replaced in place; otherwise the record
/// is appended. Returns `None` when the payload holds no record array.
pub fn merge_record(mut payload: Value, field: Option<&str>, id_attribute: &str, record: Value) -> Option<Value> {
  let list = records_mut(&mut payload, field)?;
  let id = record.get(id_attribute).filter(|id| !id.is_null()).cloned();
  let position = id
    .as_ref()
    .and_then(|id| list.iter().position(|r| r.get(id_attribute) == Some(id)));
  match position {
    Some(index) => list[index] = record,
    None => list.push(record),
  }
  Some(payload)
}

/// Wrap a record list the way the collection's responses are shaped.
pub fn wrap_records(records: Vec<Value>, field: Option<&str>) -> Value {
  match field {
    Some(field) => {
      let mut object = Map::new();
      object.insert(field.to_string(), Value::Array(records));
      Value::Object(object)
    }
    None => Value::Array(records),
  }
}

/// Attach an expiration timestamp to a record.
pub fn stamp_expiry(record: &mut Value, deadline: i64) {
  if let Some(object) = record.as_object_mut() {
    object.insert(RECORD_EXPIRY_FIELD.to_string(), Value::from(deadline));
  }
}

/// Whether a record's own expiration has passed.
pub fn record_expired(record: &Value, now: i64) -> bool {
  record
    .get(RECORD_EXPIRY_FIELD)
    .and_then(Value::as_i64)
    .is_some_and(|deadline| now > deadline)
}

/// Remove the expiration property before handing a record to a caller.
pub fn strip_expiry(record: &mut Value) {
  if let Some(object) = record.as_object_mut() {
    object.remove(RECORD_EXPIRY_FIELD);
  }
}
