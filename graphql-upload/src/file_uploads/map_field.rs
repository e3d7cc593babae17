use indexmap::IndexMap;
use serde_json::Value;

use super::Result as UploadResult;
use super::error::FileUploadError;

/// Content of the `map` field: form field name to the dotted paths receiving its value.
pub type MapFieldRaw = IndexMap<String, Vec<String>>;

/// Parses the `operations` and `map` multipart fields.
///
/// `operations` may be any JSON value, the path resolution decides later whether the
/// paths make sense for it. `map` has to be an object whose values are arrays of strings.
pub(super) fn parse(raw_operations: &str, raw_map: &str) -> UploadResult<(Value, MapFieldRaw)> {
    let operations = serde_json::from_str(raw_operations)
        .map_err(FileUploadError::InvalidJsonInOperationsField)?;
    let map = serde_json::from_str(raw_map).map_err(FileUploadError::InvalidJsonInMapField)?;
    Ok((operations, map))
}

/// Every (form field, path) pair of the map, in the order the client sent them.
pub(super) fn entries(map: &MapFieldRaw) -> impl Iterator<Item = (&str, &str)> {
    map.iter().flat_map(|(field, paths)| {
        paths
            .iter()
            .map(move |path| (field.as_str(), path.as_str()))
    })
}
