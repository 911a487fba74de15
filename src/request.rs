//! Conversion requests and their validation

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub(crate) const MISSING_MARKUP: &str = "HTML code is required";
pub(crate) const UNSUPPORTED_FORMAT: &str = "Format must be 'png' or 'jpg'";

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "png")]
    Png,
    #[serde(rename = "jpg")]
    Jpeg,
}

impl OutputFormat {
    /// Wire name and file extension (`png` / `jpg`)
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    /// PNG keeps unpainted pixels transparent; JPEG has no alpha channel
    pub fn transparent_background(self) -> bool {
        matches!(self, OutputFormat::Png)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    /// Only the exact wire names are accepted; `"jpeg"` and `"PNG"` are not.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "png" => Ok(OutputFormat::Png),
            "jpg" => Ok(OutputFormat::Jpeg),
            _ => Err(Error::Validation(UNSUPPORTED_FORMAT.to_string())),
        }
    }
}

/// A validated request to turn markup into an image.
///
/// Holding a `ConversionRequest` means validation already passed: the markup
/// has non-whitespace content and the format is supported. The markup itself
/// is kept exactly as supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    markup: String,
    format: OutputFormat,
}

impl ConversionRequest {
    /// Validate raw user input.
    ///
    /// Markup is checked first, so a request that is wrong on both counts
    /// reports the missing markup.
    ///
    /// # Examples
    ///
    /// ```
    /// use htmlsnap::{ConversionRequest, OutputFormat};
    ///
    /// let req = ConversionRequest::new("<h1>Hi</h1>", "jpg").unwrap();
    /// assert_eq!(req.format(), OutputFormat::Jpeg);
    /// assert!(ConversionRequest::new("   ", "png").is_err());
    /// assert!(ConversionRequest::new("<h1>Hi</h1>", "gif").is_err());
    /// ```
    pub fn new(markup: impl Into<String>, format: &str) -> Result<Self> {
        let markup = markup.into();
        validate_markup(&markup)?;
        let format = format.parse()?;
        Ok(Self { markup, format })
    }

    /// Build from optional fields as they arrive off the wire.
    ///
    /// Absent markup is a validation failure, as is an absent format.
    pub fn from_parts(markup: Option<String>, format: Option<&str>) -> Result<Self> {
        let markup = markup.ok_or_else(|| Error::Validation(MISSING_MARKUP.to_string()))?;
        validate_markup(&markup)?;
        let format = format
            .ok_or_else(|| Error::Validation(UNSUPPORTED_FORMAT.to_string()))?
            .parse()?;
        Ok(Self { markup, format })
    }

    /// Pair already-checked markup with a typed format
    pub fn with_format(markup: impl Into<String>, format: OutputFormat) -> Result<Self> {
        let markup = markup.into();
        validate_markup(&markup)?;
        Ok(Self { markup, format })
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

fn validate_markup(markup: &str) -> Result<()> {
    if markup.trim().is_empty() {
        return Err(Error::Validation(MISSING_MARKUP.to_string()));
    }
    Ok(())
}
