//! Series keys identify one tag-value combination within a measurement.
//!
//! A key is rendered as `measurement[,tag_key=tag_value]*` with tags sorted
//! by key. Names and values are not escaped, so neither may contain `,` or `=`.
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesKeyError {
    #[error("series key is empty")]
    Empty,

    #[error("series key {key:?} has an empty measurement name")]
    MissingMeasurement { key: String },

    #[error("series key {key:?} has a malformed tag pair {pair:?}")]
    MalformedTag { key: String, pair: String },
}

/// A series key split into its measurement and tag set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
}

impl SeriesKey {
    /// Build a key from a measurement and an unordered tag set.
    pub fn new<M, K, V>(measurement: M, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        M: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut tags: Vec<(String, String)> = tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        tags.sort();
        Self {
            measurement: measurement.into(),
            tags,
        }
    }

    pub fn parse(key: &str) -> Result<Self, SeriesKeyError> {
        if key.is_empty() {
            return Err(SeriesKeyError::Empty);
        }

        let mut parts = key.split(',');
        let measurement = parts.next().unwrap_or_default();
        if measurement.is_empty() {
            return Err(SeriesKeyError::MissingMeasurement { key: key.into() });
        }

        let tags = parts
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) if !k.is_empty() && !v.contains('=') => {
                    Ok((k.to_string(), v.to_string()))
                }
                _ => Err(SeriesKeyError::MalformedTag {
                    key: key.into(),
                    pair: pair.into(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            measurement: measurement.to_string(),
            tags,
        })
    }
}

impl Display for SeriesKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.measurement)?;
        for (k, v) in &self.tags {
            write!(f, ",{k}={v}")?;
        }
        Ok(())
    }
}
