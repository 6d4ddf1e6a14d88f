use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of one deployed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed and waiting to take over
  Installed,
  Activating,
  Activated,
  /// Install failed; this version will never activate
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

impl WorkerState {
  /// Parse a state recorded in storage. Only settled states are recorded.
  pub fn from_recorded(label: &str) -> Option<Self> {
    match label {
      "installed" => Some(Self::Installed),
      "activated" => Some(Self::Activated),
      "redundant" => Some(Self::Redundant),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "client-{}", self.0)
  }
}

/// Open hosting pages and the version controlling each of them.
#[derive(Debug, Default)]
pub struct ClientRegistry {
  clients: BTreeMap<ClientId, Option<String>>,
  next_id: u64,
}

impl ClientRegistry {
  /// Register a page, controlled by `controller` if a version is active.
  pub fn connect(&mut self, controller: Option<&str>) -> ClientId {
    let id = ClientId(self.next_id);
    self.next_id += 1;
    self.clients.insert(id, controller.map(String::from));
    id
  }

  pub fn disconnect(&mut self, id: ClientId) -> bool {
    self.clients.remove(&id).is_some()
  }

  pub fn controller(&self, id: ClientId) -> Option<&str> {
    self.clients.get(&id).and_then(|c| c.as_deref())
  }

  /// Put every open page under `version`. Returns how many changed hands.
  pub fn claim(&mut self, version: &str) -> usize {
    let mut claimed = 0;
    for controller in self.clients.values_mut() {
      if controller.as_deref() != Some(version) {
        *controller = Some(version.to_string());
        claimed += 1;
      }
    }
    claimed
  }

  /// Whether any open page is still controlled by a different version.
  pub fn held_by_other(&self, version: &str) -> bool {
    self
      .clients
      .values()
      .any(|c| matches!(c.as_deref(), Some(v) if v != version))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_claim_takes_over_all_clients() {
    let mut clients = ClientRegistry::default();
    let old = clients.connect(Some("v12"));
    let fresh = clients.connect(None);

    assert!(clients.held_by_other("v13"));
    assert_eq!(clients.claim("v13"), 2);
    assert_eq!(clients.controller(old), Some("v13"));
    assert_eq!(clients.controller(fresh), Some("v13"));
    assert!(!clients.held_by_other("v13"));
    assert_eq!(clients.claim("v13"), 0);
  }

  #[test]
  fn test_disconnect_releases_client() {
    let mut clients = ClientRegistry::default();
    let id = clients.connect(Some("v12"));

    assert!(clients.disconnect(id));
    assert!(!clients.disconnect(id));
    assert!(!clients.held_by_other("v13"));
    assert_eq!(clients.controller(id), None);
  }

  #[test]
  fn test_only_settled_states_are_restored() {
    for state in [
      WorkerState::Installed,
      WorkerState::Activated,
      WorkerState::Redundant,
    ] {
      assert_eq!(WorkerState::from_recorded(&state.to_string()), Some(state));
    }
    assert_eq!(WorkerState::from_recorded("installing"), None);
    assert_eq!(WorkerState::from_recorded("bogus"), None);
  }
}
