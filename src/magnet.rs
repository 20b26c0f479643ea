//! Magnet URI parsing.
//!
//! Only extracts the key/value lists; [`crate::torrent::Descriptor`] decides
//! which of them are required.

use nom::IResult;
use nom::Parser;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::char;
use nom::combinator::all_consuming;
use nom::multi::separated_list1;
use nom::sequence::preceded;
use url::Url;

use crate::error::{Result, TorrentError};

/// One `xt` (exact topic) entry, e.g. `urn:btih:<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactTopic {
    /// Index from an `xt.N` key, 0 for a bare `xt`
    pub position: u32,
    /// Every segment between `urn:` and the value, `urn:tree:tiger:<hash>` gives `["tree", "tiger"]`
    pub hash_type: Vec<String>,
    pub hash_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MagnetUri {
    pub display_names: Vec<String>, // dn
    pub exact_lengths: Vec<String>, // xl
    pub exact_topics: Vec<ExactTopic>, // xt, xt.N
    pub acceptable_sources: Vec<String>, // as
    pub exact_sources: Vec<String>, // xs
    pub keyword_topics: Vec<String>, // kt
    pub manifest_topics: Vec<String>, // mt
    pub trackers: Vec<String>, // tr
    pub web_seeds: Vec<String>, // ws
}

fn urn_segments(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(preceded(
        tag("urn:"),
        separated_list1(char(':'), take_while1(|c: char| c != ':')),
    ))
    .parse(input)
}

fn parse_exact_topic(value: &str, position: u32) -> Result<ExactTopic> {
    let (_, segments) = urn_segments(value)
        .map_err(|_| TorrentError::descriptor(format!("invalid xt parameter: {value:?}")))?;

    match segments.split_last() {
        Some((hash_value, hash_type)) if !hash_type.is_empty() => Ok(ExactTopic {
            position,
            hash_type: hash_type.iter().map(|s| s.to_string()).collect(),
            hash_value: hash_value.to_string(),
        }),
        _ => Err(TorrentError::descriptor(format!(
            "invalid xt parameter: {value:?}"
        ))),
    }
}

impl MagnetUri {
    /// Parse a `magnet:?` URI.
    ///
    /// # Errors
    /// `DescriptorInvalid` when the URI does not parse, does not use the
    /// `magnet` scheme, or carries a malformed exact topic.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| TorrentError::descriptor(format!("unparseable magnet uri: {e}")))?;

        if url.scheme() != "magnet" {
            return Err(TorrentError::descriptor(format!(
                "not a magnet uri scheme: {:?}",
                url.scheme()
            )));
        }

        let mut magnet = MagnetUri::default();
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "dn" => magnet.display_names.push(value),
                "xl" => magnet.exact_lengths.push(value),
                "as" => magnet.acceptable_sources.push(value),
                "xs" => magnet.exact_sources.push(value),
                "kt" => magnet.keyword_topics.push(value),
                "mt" => magnet.manifest_topics.push(value),
                "tr" => magnet.trackers.push(value),
                "ws" => magnet.web_seeds.push(value),
                "xt" => magnet.exact_topics.push(parse_exact_topic(&value, 0)?),
                other => {
                    if let Some(index) = other.strip_prefix("xt.") {
                        let position = index.parse::<u32>().map_err(|_| {
                            TorrentError::descriptor(format!("invalid xt index: {other:?}"))
                        })?;
                        magnet
                            .exact_topics
                            .push(parse_exact_topic(&value, position)?);
                    }
                }
            }
        }

        Ok(magnet)
    }
}
