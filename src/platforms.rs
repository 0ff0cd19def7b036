// src/platforms.rs

use crate::models::Platform;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown platform selector '{0}', expected one of: android, audio, ebook, linux, mac, windows, video, other, nogames, all")]
pub struct UnknownSelector(pub String);

/// A platform selector as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSelector {
    Only(Platform),
    /// Every platform except the game platforms.
    NoGames,
    All,
}

impl FromStr for PlatformSelector {
    type Err = UnknownSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nogames" => Ok(PlatformSelector::NoGames),
            "all" => Ok(PlatformSelector::All),
            other => Platform::ALL
                .iter()
                .find(|p| p.as_str() == other)
                .map(|p| PlatformSelector::Only(*p))
                .ok_or_else(|| UnknownSelector(s.to_string())),
        }
    }
}

/// Expands selectors into the concrete set of platforms to mirror.
pub fn expand(selectors: &[PlatformSelector]) -> BTreeSet<Platform> {
    let mut platforms = BTreeSet::new();
    for selector in selectors {
        match selector {
            PlatformSelector::Only(platform) => {
                platforms.insert(*platform);
            }
            PlatformSelector::NoGames => {
                platforms.extend(
                    Platform::ALL
                        .iter()
                        .filter(|p| !Platform::GAMES.contains(p)),
                );
            }
            PlatformSelector::All => platforms.extend(Platform::ALL),
        }
    }
    platforms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nogames_excludes_game_platforms() {
        let set = expand(&[PlatformSelector::NoGames]);
        assert_eq!(
            set,
            BTreeSet::from([
                Platform::Audio,
                Platform::Ebook,
                Platform::Video,
                Platform::Other
            ])
        );
    }

    #[test]
    fn selectors_union() {
        let selectors: Vec<PlatformSelector> = ["ebook", "linux", "ebook"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(
            expand(&selectors),
            BTreeSet::from([Platform::Ebook, Platform::Linux])
        );
        assert_eq!(expand(&[PlatformSelector::All]).len(), Platform::ALL.len());
    }

    #[test]
    fn rejects_unknown_selector() {
        assert_eq!(
            "games".parse::<PlatformSelector>(),
            Err(UnknownSelector("games".into()))
        );
    }
}
