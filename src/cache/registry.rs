//! Partition names that belong to the current deployment generation.

/// Exactly one static and one dynamic partition are current at any time.
/// Every other partition in the store is garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRegistry {
  version: String,
  static_name: String,
  dynamic_name: String,
}

impl VersionRegistry {
  pub fn new(prefix: &str, version: &str) -> Self {
    Self {
      version: version.to_string(),
      static_name: format!("{}-static-{}", prefix, version),
      dynamic_name: format!("{}-dynamic-{}", prefix, version),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn static_partition(&self) -> &str {
    &self.static_name
  }

  pub fn dynamic_partition(&self) -> &str {
    &self.dynamic_name
  }

  pub fn contains(&self, partition: &str) -> bool {
    partition == self.static_name || partition == self.dynamic_name
  }

  /// Names from `existing` that are not current, in input order.
  pub fn stale<'a>(&self, existing: &'a [String]) -> Vec<&'a str> {
    existing
      .iter()
      .map(String::as_str)
      .filter(|name| !self.contains(name))
      .collect()
  }
}
