use std::fmt;

use url::Url;

use crate::error::{Result, TorrentError};
use crate::magnet::MagnetUri;

/// 20-byte content identifier (BitTorrent info hash).
pub type HashValue = [u8; 20];

/// What the swarm needs to know about a torrent: its identifier, where to
/// find peers for it, and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    hash_value: HashValue,
    trackers: Vec<Url>,
    display_name: String,
}

impl Descriptor {
    /// # Errors
    /// `DescriptorInvalid` when `trackers` is empty or `display_name` is blank.
    pub fn new(hash_value: HashValue, trackers: Vec<Url>, display_name: String) -> Result<Self> {
        if trackers.is_empty() {
            return Err(TorrentError::descriptor("at least one tracker is required"));
        }
        if display_name.is_empty() {
            return Err(TorrentError::descriptor("display name is required"));
        }

        Ok(Self {
            hash_value,
            trackers,
            display_name,
        })
    }

    /// Build a descriptor from parsed magnet parameters.
    ///
    /// Requires a `dn`, at least one `tr`, and exactly one `xt` of the form
    /// `urn:btih:<40 hex chars>`.
    pub fn from_magnet(magnet: &MagnetUri) -> Result<Self> {
        let display_name = match magnet.display_names.first() {
            Some(name) if !name.is_empty() => name.clone(),
            _ => return Err(TorrentError::descriptor("magnet uri has no dn parameter")),
        };

        if magnet.trackers.is_empty() {
            return Err(TorrentError::descriptor("magnet uri has no tr parameter"));
        }
        let trackers = magnet
            .trackers
            .iter()
            .map(|tr| {
                Url::parse(tr)
                    .map_err(|e| TorrentError::descriptor(format!("invalid tracker {tr:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let [topic] = magnet.exact_topics.as_slice() else {
            return Err(TorrentError::descriptor(format!(
                "expected a single xt parameter, got {}",
                magnet.exact_topics.len()
            )));
        };
        if topic.hash_type != ["btih"] {
            return Err(TorrentError::descriptor(format!(
                "xt hash type must be btih, got {:?}",
                topic.hash_type
            )));
        }
        if topic.hash_value.len() != 40 {
            return Err(TorrentError::descriptor(format!(
                "btih value must be 40 hex characters, got {}",
                topic.hash_value.len()
            )));
        }

        let mut hash_value = [0u8; 20];
        hex::decode_to_slice(&topic.hash_value, &mut hash_value)
            .map_err(|e| TorrentError::descriptor(format!("btih value is not hex: {e}")))?;

        Self::new(hash_value, trackers, display_name)
    }

    /// Parse a magnet URI and build the descriptor in one step.
    pub fn from_magnet_str(uri: &str) -> Result<Self> {
        Self::from_magnet(&MagnetUri::parse(uri)?)
    }

    pub fn hash_value(&self) -> &HashValue {
        &self.hash_value
    }

    pub fn trackers(&self) -> &[Url] {
        &self.trackers
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} trackers)",
            self.display_name,
            hex::encode(self.hash_value),
            self.trackers.len()
        )
    }
}
