use regex::Regex;

use crate::error::ConfigError;
use crate::record::LogRecord;

/// Container/namespace/pod selection applied to every record.
///
/// Each constraint is optional; a record is in scope when it satisfies all
/// of the constraints that are set.
#[derive(Clone, Default)]
pub struct SelectionCriteria {
    container_name: String,
    namespace_name: String,
    pod_pattern: Option<Regex>,
}

impl SelectionCriteria {
    /// Build criteria, compiling the pod pattern up front.
    pub fn new(
        container_name: &str,
        namespace_name: &str,
        pod_pattern: &str,
    ) -> Result<Self, ConfigError> {
        let pod_pattern = if pod_pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(pod_pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pod_pattern.to_string(),
                    source,
                })?,
            )
        };

        Ok(Self {
            container_name: container_name.to_string(),
            namespace_name: namespace_name.to_string(),
            pod_pattern,
        })
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn namespace_name(&self) -> &str {
        &self.namespace_name
    }

    pub fn pod_pattern(&self) -> &str {
        self.pod_pattern.as_ref().map_or("", Regex::as_str)
    }

    /// Check if the criteria accept every record
    pub fn is_empty(&self) -> bool {
        self.container_name.is_empty() && self.namespace_name.is_empty() && self.pod_pattern.is_none()
    }

    /// Check if a record is in scope
    pub fn in_scope(&self, record: &LogRecord) -> bool {
        if !self.container_name.is_empty() && record.container_name != self.container_name {
            return false;
        }

        if !self.namespace_name.is_empty() && record.namespace_name != self.namespace_name {
            return false;
        }

        // Unanchored patterns match anywhere in the pod name
        match &self.pod_pattern {
            Some(re) => re.is_match(&record.pod_name),
            None => true,
        }
    }
}

impl std::fmt::Debug for SelectionCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionCriteria")
            .field("container_name", &self.container_name)
            .field("namespace_name", &self.namespace_name)
            .field("pod_pattern", &self.pod_pattern())
            .finish()
    }
}
