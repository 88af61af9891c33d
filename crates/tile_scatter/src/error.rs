//! Error types and result alias for the crate.
//!
//! This module defines [`enum@crate::error::Error`] and the crate-wide [Result] alias. Variants
//! cover invalid configuration, tiles and prototypes that cannot be resolved, mask stacks that
//! needed correction, and a parallel simulate pass whose readback does not line up with the
//! workspace it ran against.
use glam::Vec2;
use thiserror::Error;

use crate::mask::BlendMode;
use crate::resource::ResourceType;
use crate::tiles::TileId;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{resource_type} prototype {index} is not registered on tile {tile}")]
    MissingResource {
        tile: TileId,
        resource_type: ResourceType,
        index: usize,
    },

    #[error("no tile intersects the square of range {range} around {center}")]
    TileUnavailable { center: Vec2, range: f32 },

    #[error("mask stack '{stack}' starts with {found:?} instead of Multiply")]
    MaskConfiguration { stack: String, found: BlendMode },

    #[error("simulate readback for rule '{rule}' returned {actual} flags for {expected} tiles")]
    SimulationReadbackMismatch {
        rule: String,
        expected: usize,
        actual: usize,
    },

    #[error("unknown tile {0}")]
    UnknownTile(TileId),

    #[error("no {resource_type} prototype registered at index {index}")]
    UnknownPrototype {
        resource_type: ResourceType,
        index: usize,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns `true` for errors a rule can recover from by registering a prototype.
    pub fn is_missing_resource(&self) -> bool {
        matches!(self, Error::MissingResource { .. })
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Other(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_allocates_owned_message() {
        let err: Error = "issue".into();
        assert!(matches!(err, Error::Other(ref msg) if msg == "issue"));
    }

    #[test]
    fn missing_resource_message_names_tile_and_type() {
        let err = Error::MissingResource {
            tile: TileId(3),
            resource_type: ResourceType::Texture,
            index: 2,
        };
        assert!(err.is_missing_resource());
        assert_eq!(
            err.to_string(),
            "Texture prototype 2 is not registered on tile #3"
        );
    }

    #[test]
    fn mask_configuration_reports_found_blend_mode() {
        let err = Error::MaskConfiguration {
            stack: "rule:grass".into(),
            found: BlendMode::Add,
        };
        assert!(!err.is_missing_resource());
        assert!(err.to_string().contains("Add"));
    }
}
