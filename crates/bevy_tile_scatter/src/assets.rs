use core::result::Result;

use bevy::asset::io::Reader;
use bevy::asset::{AssetLoader, LoadContext};
use bevy::prelude::*;
use bevy::reflect::TypePath;
use bevy::tasks::ConditionalSendFuture;
use serde::{Deserialize, Serialize};
use tile_scatter::prelude::*;

/// Asset holding the spawners of an area pass, in run order.
#[derive(Asset, TypePath, Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpawnerAsset {
    pub spawners: Vec<Spawner>,
}

impl SpawnerAsset {
    pub fn new(spawners: Vec<Spawner>) -> Self {
        Self { spawners }
    }

    /// Validates every spawner. Spawner names must be unique.
    pub fn validate(&self) -> tile_scatter::error::Result<()> {
        for (i, spawner) in self.spawners.iter().enumerate() {
            spawner.validate()?;
            if self.spawners[..i].iter().any(|s| s.name == spawner.name) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate spawner '{}'",
                    spawner.name
                )));
            }
        }
        Ok(())
    }
}

/// Asset loader for [`SpawnerAsset`] using RON files with `.spawner` extension.
#[derive(TypePath)]
pub struct SpawnerAssetLoader;

impl AssetLoader for SpawnerAssetLoader {
    type Asset = SpawnerAsset;
    type Settings = ();
    type Error = anyhow::Error;

    fn extensions(&self) -> &[&str] {
        &["spawner"]
    }

    fn load(
        &self,
        reader: &mut dyn Reader,
        _settings: &Self::Settings,
        _context: &mut LoadContext,
    ) -> impl ConditionalSendFuture<Output = Result<Self::Asset, Self::Error>> {
        Box::pin(async move {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).await?;
            parse_spawner_asset(&bytes)
        })
    }
}

impl FromWorld for SpawnerAssetLoader {
    fn from_world(_: &mut World) -> Self {
        SpawnerAssetLoader
    }
}

/// Parses and validates a RON spawner definition.
pub fn parse_spawner_asset(bytes: &[u8]) -> anyhow::Result<SpawnerAsset> {
    let asset: SpawnerAsset = ron::de::from_bytes(bytes).map_err(|e| anyhow::anyhow!(e))?;
    asset.validate()?;
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREST: &str = r#"(
        spawners: [
            (
                name: "forest",
                mode: Replace,
                mask: (name: "forest", nodes: [
                    (operation: Noise((kind: Billow, seed: 3, octaves: 2, zoom: 48.0))),
                ]),
                rules: [
                    (
                        name: "oaks",
                        resource_type: Tree,
                        resource_index: 0,
                        failure_rate: 0.25,
                        mask: (name: "rule:oaks", nodes: [
                            (operation: Height(min: 0.0, max: 40.0, falloff: 5.0)),
                            (operation: Constant(value: 0.2), blend: Add),
                        ]),
                    ),
                    (name: "grass", resource_type: Detail, resource_index: 1),
                ],
            ),
        ],
    )"#;

    #[test]
    fn parses_spawners_with_defaults() {
        let asset = parse_spawner_asset(FOREST.as_bytes()).expect("parse");
        assert_eq!(asset.spawners.len(), 1);
        let forest = &asset.spawners[0];
        assert_eq!(forest.mode, SpawnMode::Replace);
        assert!(forest.active);
        assert_eq!(forest.rules.len(), 2);

        let oaks = &forest.rules[0];
        assert_eq!(oaks.resource_type, ResourceType::Tree);
        assert_eq!(oaks.failure_rate, 0.25);
        assert_eq!(oaks.mask.nodes[1].blend, BlendMode::Add);
        assert!(oaks.mask.nodes[0].active);

        let grass = &forest.rules[1];
        assert_eq!(grass.resource_index, 1);
        assert_eq!(grass.strength, 1.0);
    }

    #[test]
    fn rejects_duplicate_rules() {
        let src = r#"(spawners: [(name: "a", rules: [
            (name: "x", resource_type: Tree, resource_index: 0),
            (name: "x", resource_type: Tree, resource_index: 1),
        ])])"#;
        assert!(parse_spawner_asset(src.as_bytes()).is_err());
    }
}
