use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::Result as UploadResult;
use super::error::FileUploadError;
use super::map_field::MapFieldRaw;

static NULL: Value = Value::Null;

/// Body forwarded in place of the multipart request.
#[derive(Serialize)]
struct ReassembledRequest<'a> {
    variables: &'a Value,
    query: &'a Value,
    operations: &'a Value,
    map: &'a MapFieldRaw,
}

/// Serializes the rewritten operations into a JSON GraphQL request body.
pub(crate) fn build(operations: &Value, map: &MapFieldRaw) -> UploadResult<Bytes> {
    let request = ReassembledRequest {
        variables: operations.get("variables").unwrap_or(&NULL),
        query: operations.get("query").unwrap_or(&NULL),
        operations,
        map,
    };
    serde_json::to_vec(&request)
        .map(Bytes::from)
        .map_err(FileUploadError::Serialization)
}
