//! Campaign export/import.
//!
//! An export is compact JSON compressed with zlib. Floats are rounded to a
//! fixed number of fractional digits before compression, which keeps the
//! 2-D absorbance matrices small.

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::Utc;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::info;

use crate::cache::FileCache;
use crate::campaign::Campaign;
use crate::domain::{CachedFile, FileId};
use crate::error::KiraError;
use crate::state::StateStore;

pub const ARCHIVE_FORMAT: &str = "kira-chrom-campaign";
pub const ARCHIVE_VERSION: u32 = 1;
pub const EXPORT_FILE_NAME: &str = "campaign.kcs";
pub const DEFAULT_FLOAT_DIGITS: usize = 7;

/// Guards against decompression bombs on upload.
const MAX_ARCHIVE_BYTES: u64 = 1 << 30;

#[derive(Debug, Serialize)]
struct ArchiveOut<'a> {
    format: &'a str,
    version: u32,
    exported_at: String,
    campaign: &'a Campaign,
}

#[derive(Debug, Deserialize)]
struct CampaignArchive {
    format: String,
    version: u32,
    campaign: Campaign,
}

#[derive(Debug, Clone)]
pub struct PersistenceCodec {
    state: Arc<StateStore>,
    cache: FileCache,
    float_digits: usize,
}

impl PersistenceCodec {
    pub fn new(state: Arc<StateStore>, cache: FileCache) -> Self {
        Self::with_float_digits(state, cache, DEFAULT_FLOAT_DIGITS)
    }

    pub fn with_float_digits(state: Arc<StateStore>, cache: FileCache, float_digits: usize) -> Self {
        Self {
            state,
            cache,
            float_digits,
        }
    }

    /// Writes the current campaign into a new cached file.
    pub fn export(&self) -> Result<CachedFile, KiraError> {
        let campaign = self.state.campaign();
        let bytes = encode_campaign(&campaign, self.float_digits)?;
        let id = self.cache.store(EXPORT_FILE_NAME, &bytes)?;
        let file = self.cache.get(id)?;
        info!(
            %id,
            path = %file.cached_path,
            chromatograms = campaign.len(),
            bytes = bytes.len(),
            "exported campaign"
        );
        Ok(file)
    }

    /// Replaces the current campaign with the one stored in `id`. The state
    /// is untouched when the file is not a campaign export or while a
    /// background run owns the campaign.
    pub fn import(&self, id: FileId) -> Result<Arc<Campaign>, KiraError> {
        let bytes = self.cache.read(id)?;
        let campaign = decode_campaign(&bytes)?;
        let campaign = self.state.set_campaign_unless_processing(campaign)?;
        info!(%id, chromatograms = campaign.len(), "imported campaign");
        Ok(campaign)
    }
}

pub fn encode_campaign(campaign: &Campaign, float_digits: usize) -> Result<Vec<u8>, KiraError> {
    let archive = ArchiveOut {
        format: ARCHIVE_FORMAT,
        version: ARCHIVE_VERSION,
        exported_at: Utc::now().to_rfc3339(),
        campaign,
    };
    let mut value =
        serde_json::to_value(&archive).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    round_floats(&mut value, float_digits);
    let json = value.to_string();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(json.as_bytes())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| KiraError::Filesystem(err.to_string()))
}

pub fn decode_campaign(bytes: &[u8]) -> Result<Campaign, KiraError> {
    let mut json = String::new();
    ZlibDecoder::new(bytes)
        .take(MAX_ARCHIVE_BYTES)
        .read_to_string(&mut json)
        .map_err(|err| KiraError::CorruptFile(format!("cannot decompress: {err}")))?;
    let archive: CampaignArchive =
        serde_json::from_str(&json).map_err(|err| KiraError::CorruptFile(err.to_string()))?;
    if archive.format != ARCHIVE_FORMAT {
        return Err(KiraError::CorruptFile(format!(
            "unexpected format `{}`",
            archive.format
        )));
    }
    if archive.version > ARCHIVE_VERSION {
        return Err(KiraError::CorruptFile(format!(
            "unsupported version {}",
            archive.version
        )));
    }
    archive
        .campaign
        .validate()
        .map_err(KiraError::CorruptFile)?;
    Ok(archive.campaign)
}

/// Arrays under these keys are sample axes and must stay strictly
/// increasing, so they are written exactly.
const EXACT_KEYS: [&str; 2] = ["time", "wavelength"];

/// Rounds every floating-point number in `value` to `digits` fractional
/// digits. Integers, strings and the arrays under [`EXACT_KEYS`] are left
/// alone.
pub fn round_floats(value: &mut Value, digits: usize) {
    match value {
        Value::Number(number) if number.is_f64() => {
            if let Some(rounded) = number
                .as_f64()
                .map(|float| round_to(float, digits))
                .and_then(Number::from_f64)
            {
                *number = rounded;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| round_floats(item, digits)),
        Value::Object(map) => map
            .iter_mut()
            .filter(|(key, _)| !EXACT_KEYS.contains(&key.as_str()))
            .for_each(|(_, item)| round_floats(item, digits)),
        _ => {}
    }
}

fn round_to(value: f64, digits: usize) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let scaled = (value * scale).round();
    if scaled.is_finite() && scaled.abs() < 9.0e15 {
        scaled / scale
    } else {
        value
    }
}
