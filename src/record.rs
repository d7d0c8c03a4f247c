use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use serde_json::value::RawValue;

/// Decoded view of one exported log entry.
///
/// Absent and empty fields are both represented by empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub text_payload: String,
    /// Raw JSON text of `jsonPayload`, exactly as it appeared in the entry.
    pub structured_payload: Option<String>,
    pub pod_name: String,
    pub namespace_name: String,
    pub container_name: String,
    pub project_id: String,
    pub zone: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Entry {
    json_payload: Option<Box<RawValue>>,
    #[serde(deserialize_with = "lenient")]
    labels: Option<EntryLabels>,
    #[serde(deserialize_with = "lenient")]
    resource: Option<Resource>,
    #[serde(deserialize_with = "lenient")]
    timestamp: Option<String>,
    #[serde(deserialize_with = "lenient")]
    text_payload: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct EntryLabels {
    #[serde(rename = "container.googleapis.com/pod_name", deserialize_with = "lenient")]
    pod_name: Option<String>,
    #[serde(rename = "container.googleapis.com/namespace_name", deserialize_with = "lenient")]
    namespace_name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Resource {
    #[serde(deserialize_with = "lenient")]
    labels: Option<ResourceLabels>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResourceLabels {
    #[serde(deserialize_with = "lenient")]
    project_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    zone: Option<String>,
    #[serde(deserialize_with = "lenient")]
    location: Option<String>,
    #[serde(deserialize_with = "lenient")]
    container_name: Option<String>,
    // k8s_container resources carry the workload labels here instead
    #[serde(deserialize_with = "lenient")]
    pod_name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    namespace_name: Option<String>,
}

/// Accept any JSON value for a field and keep it only if it has the expected
/// shape, so one mistyped field leaves the rest of the entry intact.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// Parse a raw message payload into a [`LogRecord`].
///
/// Unknown fields are ignored; missing or mistyped ones come back empty.
/// Invalid UTF-8 is replaced rather than rejected. An error is only returned
/// when the payload is not a JSON object at all; callers are expected to carry
/// on with [`LogRecord::default`] in that case.
pub fn decode(data: &[u8]) -> Result<LogRecord, serde_json::Error> {
    let text = String::from_utf8_lossy(data);
    let entry: Entry = serde_json::from_str(&text)?;

    let labels = entry.labels.unwrap_or_default();
    let resource = entry
        .resource
        .and_then(|r| r.labels)
        .unwrap_or_default();

    Ok(LogRecord {
        timestamp: entry.timestamp.unwrap_or_default(),
        text_payload: entry.text_payload.unwrap_or_default(),
        structured_payload: entry.json_payload.map(|raw| raw.get().to_string()),
        pod_name: first_non_empty(labels.pod_name, resource.pod_name),
        namespace_name: first_non_empty(labels.namespace_name, resource.namespace_name),
        container_name: resource.container_name.unwrap_or_default(),
        project_id: resource.project_id.unwrap_or_default(),
        zone: first_non_empty(resource.zone, resource.location),
    })
}

fn first_non_empty(preferred: Option<String>, fallback: Option<String>) -> String {
    match preferred {
        Some(value) if !value.is_empty() => value,
        _ => fallback.unwrap_or_default(),
    }
}
