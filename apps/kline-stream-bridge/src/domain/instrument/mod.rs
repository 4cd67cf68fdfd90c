//! Instrument Catalog
//!
//! Instrument classes, feed selection, and symbol resolution for charting
//! consumers.
//!
//! Exchange-listed equities (`us_stock`, `hk_stock`, `cn_stock`) are served
//! by a dedicated equity feed; forex, metals and crypto share the generic
//! feed. The class also decides backfill behaviour and which resolutions
//! are offered.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::streaming::Resolution;

// =============================================================================
// Classes
// =============================================================================

/// Physical feed an instrument is streamed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedClass {
    /// Exchange-listed equities.
    Equity,
    /// Forex, metals and crypto.
    Generic,
}

impl FeedClass {
    /// Both feed classes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Equity, Self::Generic]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for FeedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument class as reported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentClass {
    /// US-listed stock.
    UsStock,
    /// Hong Kong-listed stock.
    HkStock,
    /// Mainland China-listed stock.
    CnStock,
    /// Currency pair.
    Forex,
    /// Precious metal.
    Metal,
    /// Crypto asset.
    Crypto,
}

impl InstrumentClass {
    /// Whether the instrument is an exchange-listed equity.
    #[must_use]
    pub const fn is_equity(self) -> bool {
        matches!(self, Self::UsStock | Self::HkStock | Self::CnStock)
    }

    /// Feed serving this class.
    #[must_use]
    pub const fn feed_class(self) -> FeedClass {
        if self.is_equity() {
            FeedClass::Equity
        } else {
            FeedClass::Generic
        }
    }

    /// Whether history may be fetched at most once per (instrument, resolution).
    #[must_use]
    pub const fn single_backfill(self) -> bool {
        self.is_equity()
    }

    /// Whether bars at `resolution` are offered for this class.
    #[must_use]
    pub const fn supports(self, resolution: Resolution) -> bool {
        !self.is_equity() || resolution.available_for_equities()
    }

    /// Resolutions offered for this class.
    #[must_use]
    pub fn supported_resolutions(self) -> Vec<Resolution> {
        Resolution::all()
            .iter()
            .copied()
            .filter(|r| self.supports(*r))
            .collect()
    }

    /// Wire name (`us_stock`, `forex`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UsStock => "us_stock",
            Self::HkStock => "hk_stock",
            Self::CnStock => "cn_stock",
            Self::Forex => "forex",
            Self::Metal => "metal",
            Self::Crypto => "crypto",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentClass {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "us_stock" => Ok(Self::UsStock),
            "hk_stock" => Ok(Self::HkStock),
            "cn_stock" => Ok(Self::CnStock),
            "forex" => Ok(Self::Forex),
            "metal" => Ok(Self::Metal),
            "crypto" => Ok(Self::Crypto),
            other => Err(CatalogError::UnknownClass(other.to_string())),
        }
    }
}

// =============================================================================
// Instruments
// =============================================================================

/// A tradable instrument known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Display symbol, e.g. `USDJPY` or `TSLA.US`.
    pub symbol: String,
    /// Full name, e.g. `USD/JPY`.
    pub full_name: String,
    /// Free-form description.
    pub description: String,
    /// Feed instrument code.
    pub ticker: String,
    /// Instrument class.
    #[serde(rename = "type")]
    pub class: InstrumentClass,
    /// Exchange identifier.
    pub exchange: String,
}

impl Instrument {
    /// Minimal instrument whose symbol, name and ticker are all `code`.
    #[must_use]
    pub fn from_code(code: &str, class: InstrumentClass) -> Self {
        Self {
            symbol: code.to_string(),
            full_name: code.to_string(),
            description: code.to_string(),
            ticker: code.to_string(),
            class,
            exchange: class.as_str().to_uppercase(),
        }
    }
}

/// Chart-facing description of a resolved instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolProfile {
    /// Display name.
    pub name: String,
    /// Feed instrument code.
    pub ticker: String,
    /// Description.
    pub description: String,
    /// Instrument class.
    pub class: InstrumentClass,
    /// Exchange identifier.
    pub exchange: String,
    /// Trading session in `HHMM-HHMM[,HHMM-HHMM]` form, or `24x7`.
    pub session: &'static str,
    /// IANA timezone of the session.
    pub timezone: &'static str,
    /// Price scale (100 = two decimals).
    pub price_scale: u32,
    /// Resolutions the feed serves for this instrument.
    pub supported_resolutions: Vec<Resolution>,
}

impl SymbolProfile {
    fn for_instrument(instrument: &Instrument) -> Self {
        let (session, timezone, price_scale) = match instrument.class {
            InstrumentClass::UsStock => ("0930-1600", "America/New_York", 100),
            InstrumentClass::HkStock => ("0930-1200,1300-1600", "Asia/Hong_Kong", 100),
            InstrumentClass::CnStock => ("0930-1130,1300-1500", "Asia/Shanghai", 100),
            InstrumentClass::Forex | InstrumentClass::Metal => ("24x7", "Etc/UTC", 100_000),
            InstrumentClass::Crypto => ("24x7", "Etc/UTC", 100),
        };

        Self {
            name: instrument.symbol.clone(),
            ticker: instrument.ticker.clone(),
            description: instrument.description.clone(),
            class: instrument.class,
            exchange: instrument.exchange.clone(),
            session,
            timezone,
            price_scale,
            supported_resolutions: instrument.class.supported_resolutions(),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Catalog lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// No instrument matches the code.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),
    /// The class name is not recognised.
    #[error("unknown instrument class: {0}")]
    UnknownClass(String),
}

/// In-memory instrument catalog keyed by ticker.
#[derive(Debug, Clone, Default)]
pub struct InstrumentCatalog {
    instruments: Vec<Instrument>,
    by_ticker: HashMap<String, usize>,
}

impl InstrumentCatalog {
    /// Build a catalog; later duplicates of a ticker replace earlier ones.
    #[must_use]
    pub fn new(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        let mut catalog = Self::default();
        for instrument in instruments {
            catalog.insert(instrument);
        }
        catalog
    }

    /// Add or replace an instrument.
    pub fn insert(&mut self, instrument: Instrument) {
        if let Some(&idx) = self.by_ticker.get(&instrument.ticker) {
            self.instruments[idx] = instrument;
        } else {
            self.by_ticker
                .insert(instrument.ticker.clone(), self.instruments.len());
            self.instruments.push(instrument);
        }
    }

    /// Find an instrument by ticker or display symbol.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::UnknownInstrument` if nothing matches.
    pub fn lookup(&self, code: &str) -> Result<&Instrument, CatalogError> {
        self.by_ticker
            .get(code)
            .map(|&idx| &self.instruments[idx])
            .or_else(|| self.instruments.iter().find(|i| i.symbol == code))
            .ok_or_else(|| CatalogError::UnknownInstrument(code.to_string()))
    }

    /// Resolve an instrument into its chart profile.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::UnknownInstrument` if nothing matches.
    pub fn resolve(&self, code: &str) -> Result<SymbolProfile, CatalogError> {
        self.lookup(code).map(SymbolProfile::for_instrument)
    }

    /// Case-insensitive search over symbol and full name.
    ///
    /// An empty query returns every instrument.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&Instrument> {
        let needle = query.trim().to_lowercase();
        self.instruments
            .iter()
            .filter(|i| {
                needle.is_empty()
                    || i.symbol.to_lowercase().contains(&needle)
                    || i.full_name.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Number of instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}
