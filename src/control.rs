//! Control-channel commands accepted from page contexts.

/// Activate a waiting generation without waiting for page reloads.
pub const SKIP_WAITING: &str = "SKIP_WAITING";
/// Reply with the active generation identifier.
pub const GET_VERSION: &str = "GET_VERSION";
/// Delete every store regardless of generation.
pub const CLEAR_CACHE: &str = "CLEAR_CACHE";

/// A recognized control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
  SkipWaiting,
  GetVersion,
  ClearCache,
}

impl ControlCommand {
  /// Parse a wire command. Unknown commands yield None and are ignored
  /// by the worker without a reply.
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim() {
      SKIP_WAITING => Some(Self::SkipWaiting),
      GET_VERSION => Some(Self::GetVersion),
      CLEAR_CACHE => Some(Self::ClearCache),
      _ => None,
    }
  }
}

/// Replies sent back on the caller-supplied channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
  /// Active generation identifier, for GET_VERSION
  Version(String),
  /// Acknowledgment, for CLEAR_CACHE
  CacheCleared,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_known_commands() {
    assert_eq!(ControlCommand::parse("SKIP_WAITING"), Some(ControlCommand::SkipWaiting));
    assert_eq!(ControlCommand::parse("GET_VERSION"), Some(ControlCommand::GetVersion));
    assert_eq!(ControlCommand::parse("CLEAR_CACHE"), Some(ControlCommand::ClearCache));
  }

  #[test]
  fn test_parse_trims_whitespace() {
    assert_eq!(ControlCommand::parse("  GET_VERSION\n"), Some(ControlCommand::GetVersion));
  }

  #[test]
  fn test_parse_unknown_is_none() {
    assert_eq!(ControlCommand::parse("PURGE_EVERYTHING"), None);
    assert_eq!(ControlCommand::parse("get_version"), None);
    assert_eq!(ControlCommand::parse(""), None);
  }
}
