//! Serialization and compression of DTO bundles.
//!
//! An [`OutputFormat`] names a DTO shape, a wire format and a compression,
//! e.g. `flash.json.deflate`. Rendering is a pure function of the bundle and
//! the format, and is byte-deterministic: publishing the same snapshot twice
//! produces identical artifacts.

use crate::dto::{Bundle, DtoShape};
use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Wire serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    Json,
    Yaml,
}

impl WireFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::Yaml => "yaml",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Json => "application/json",
            WireFormat::Yaml => "application/yaml",
        }
    }
}

/// Compression applied after serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    /// Single-entry zip archive, deflated
    Deflate,
}

/// A complete output format: `<shape>.<wire>[.<compression>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputFormat {
    pub shape: DtoShape,
    pub wire: WireFormat,
    pub compression: Compression,
}

impl OutputFormat {
    pub fn new(shape: DtoShape, wire: WireFormat, compression: Compression) -> Self {
        Self {
            shape,
            wire,
            compression,
        }
    }

    /// Content type of the stored bytes, or of the payload when decompressed.
    pub fn content_type(&self, decompressed: bool) -> &'static str {
        match self.compression {
            Compression::Deflate if !decompressed => "application/zip",
            _ => self.wire.content_type(),
        }
    }

    /// Parse a comma-separated list, ignoring blanks and duplicates.
    pub fn parse_list(list: &str) -> anyhow::Result<Vec<OutputFormat>> {
        let mut formats = Vec::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let format: OutputFormat = part.parse()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Ok(formats)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.shape, self.wire.extension())?;
        if self.compression == Compression::Deflate {
            f.write_str(".deflate")?;
        }
        Ok(())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        let (shape, wire, compression) = match parts.as_slice() {
            [shape, wire] => (shape, wire, None),
            [shape, wire, compression] => (shape, wire, Some(*compression)),
            _ => anyhow::bail!("Invalid output format '{}' (expected <shape>.<wire>[.<compression>])", s),
        };

        let wire = match *wire {
            "json" => WireFormat::Json,
            "yaml" | "yml" => WireFormat::Yaml,
            other => anyhow::bail!("Unknown wire format '{}' in '{}'", other, s),
        };
        let compression = match compression {
            None | Some("none") => Compression::None,
            Some("deflate") => Compression::Deflate,
            Some(other) => anyhow::bail!("Unknown compression '{}' in '{}'", other, s),
        };

        Ok(OutputFormat::new(shape.parse()?, wire, compression))
    }
}

fn codec_error(bundle: &Bundle, format: &OutputFormat, reason: impl fmt::Display) -> CodecError {
    CodecError {
        bundle: bundle.bundle.clone(),
        format: format.to_string(),
        reason: reason.to_string(),
    }
}

/// Serialize a bundle into its wire format.
pub fn encode(bundle: &Bundle, format: &OutputFormat) -> Result<Vec<u8>, CodecError> {
    match format.wire {
        WireFormat::Json => serde_json::to_vec(bundle).map_err(|e| codec_error(bundle, format, e)),
        WireFormat::Yaml => serde_yaml::to_string(bundle)
            .map(String::into_bytes)
            .map_err(|e| codec_error(bundle, format, e)),
    }
}

/// Compress a serialized payload. `entry_name` names the zip entry.
pub fn compress(payload: Vec<u8>, compression: Compression, entry_name: &str) -> std::io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(payload),
        Compression::Deflate => {
            let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .last_modified_time(zip::DateTime::default())
                .unix_permissions(0o644);
            zip.start_file(entry_name, options)?;
            zip.write_all(&payload)?;
            Ok(zip.finish()?.into_inner())
        }
    }
}

/// Reverse [`compress`].
pub fn decompress(bytes: &[u8], compression: Compression) -> std::io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Deflate => {
            let mut archive = ZipArchive::new(Cursor::new(bytes))?;
            if archive.len() != 1 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("expected a single-entry archive, found {} entries", archive.len()),
                ));
            }
            let mut entry = archive.by_index(0)?;
            let mut payload = Vec::new();
            entry.read_to_end(&mut payload)?;
            Ok(payload)
        }
    }
}

/// Serialize and compress a bundle.
pub fn render(bundle: &Bundle, format: &OutputFormat) -> Result<Vec<u8>, CodecError> {
    let payload = encode(bundle, format)?;
    let entry_name = format!("{}.{}", bundle.bundle, format.wire.extension());
    compress(payload, format.compression, &entry_name).map_err(|e| codec_error(bundle, format, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::LanguageCode;
    use serde_json::{json, Map, Value};

    fn bundle() -> Bundle {
        let mut record = Map::new();
        record.insert("id".to_string(), json!("sword01"));
        record.insert("name".to_string(), json!("Espada de Ferro"));
        Bundle {
            bundle: "item".to_string(),
            language: LanguageCode::parse("pt-BR").unwrap(),
            shape: DtoShape::Flash,
            records: vec![record],
        }
    }

    // ==================== Format Name Tests ====================

    #[test]
    fn test_parse_format_names() {
        let format: OutputFormat = "flash.json.deflate".parse().unwrap();
        assert_eq!(format, OutputFormat::new(DtoShape::Flash, WireFormat::Json, Compression::Deflate));

        let format: OutputFormat = "ios.yaml".parse().unwrap();
        assert_eq!(format, OutputFormat::new(DtoShape::Ios, WireFormat::Yaml, Compression::None));
    }

    #[test]
    fn test_format_display_round_trips() {
        for name in ["flash.json", "flash.json.deflate", "ios.yaml.deflate"] {
            assert_eq!(name.parse::<OutputFormat>().unwrap().to_string(), name);
        }
        assert_eq!("ios.json.none".parse::<OutputFormat>().unwrap().to_string(), "ios.json");
    }

    #[test]
    fn test_invalid_format_names() {
        assert!("flash".parse::<OutputFormat>().is_err());
        assert!("flash.xml".parse::<OutputFormat>().is_err());
        assert!("android.json".parse::<OutputFormat>().is_err());
        assert!("flash.json.gzip".parse::<OutputFormat>().is_err());
        assert!("flash.json.deflate.extra".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_list_dedupes() {
        let formats = OutputFormat::parse_list("flash.json.deflate, ios.json.deflate,,flash.json.deflate").unwrap();
        assert_eq!(formats.len(), 2);
    }

    #[test]
    fn test_content_type() {
        let format: OutputFormat = "flash.json.deflate".parse().unwrap();
        assert_eq!(format.content_type(false), "application/zip");
        assert_eq!(format.content_type(true), "application/json");
    }

    // ==================== Rendering Tests ====================

    #[test]
    fn test_json_render() {
        let format: OutputFormat = "flash.json".parse().unwrap();
        let bytes = render(&bundle(), &format).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["records"][0]["name"], "Espada de Ferro");
        assert_eq!(value["language"], "pt-BR");
        assert_eq!(value["shape"], "flash");
    }

    #[test]
    fn test_yaml_render() {
        let format: OutputFormat = "flash.yaml".parse().unwrap();
        let bytes = render(&bundle(), &format).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Espada de Ferro"));
        assert!(text.contains("bundle: item"));
    }

    #[test]
    fn test_deflate_is_deterministic() {
        let format: OutputFormat = "flash.json.deflate".parse().unwrap();
        let first = render(&bundle(), &format).unwrap();
        let second = render(&bundle(), &format).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_deflate_decompresses_to_payload() {
        let format: OutputFormat = "flash.json.deflate".parse().unwrap();
        let compressed = render(&bundle(), &format).unwrap();
        assert_eq!(&compressed[..2], b"PK");

        let payload = decompress(&compressed, Compression::Deflate).unwrap();
        assert_eq!(payload, encode(&bundle(), &format).unwrap());
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress(b"not a zip", Compression::Deflate).is_err());
    }
}
