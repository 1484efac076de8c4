//! Typed ownership reference, replacing the `(owner_type, owner_id)` string
//! pairs the original schema uses directly in application code. The pair is
//! still how a row is stored -- `OwnerRef` only exists at the Rust layer, so
//! a handler can never construct an owner with a typo'd type string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OwnerRef {
    Player(i64),
    Corp(i64),
    NpcFaction(i64),
    Port(i64),
    System,
}

impl OwnerRef {
    pub fn type_str(&self) -> &'static str {
        match self {
            OwnerRef::Player(_) => "player",
            OwnerRef::Corp(_) => "corp",
            OwnerRef::NpcFaction(_) => "npc_faction",
            OwnerRef::Port(_) => "port",
            OwnerRef::System => "system",
        }
    }

    /// `0` for the singleton `System` owner, which has no row id of its own.
    pub fn id(&self) -> i64 {
        match self {
            OwnerRef::Player(id)
            | OwnerRef::Corp(id)
            | OwnerRef::NpcFaction(id)
            | OwnerRef::Port(id) => *id,
            OwnerRef::System => 0,
        }
    }

    pub fn from_parts(owner_type: &str, owner_id: i64) -> Result<OwnerRef, String> {
        match owner_type {
            "player" => Ok(OwnerRef::Player(owner_id)),
            "corp" => Ok(OwnerRef::Corp(owner_id)),
            "npc_faction" => Ok(OwnerRef::NpcFaction(owner_id)),
            "port" => Ok(OwnerRef::Port(owner_id)),
            "system" => Ok(OwnerRef::System),
            other => Err(format!("unknown owner_type '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_parts() {
        let refs = [
            OwnerRef::Player(7),
            OwnerRef::Corp(3),
            OwnerRef::NpcFaction(1),
            OwnerRef::Port(2),
            OwnerRef::System,
        ];
        for r in refs {
            let round = OwnerRef::from_parts(r.type_str(), r.id()).unwrap();
            assert_eq!(round, r);
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(OwnerRef::from_parts("alien", 1).is_err());
    }
}
