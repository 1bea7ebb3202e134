//! Contract Types
//!
//! What a lookup asks for (`ContractSpec`) and what the gateway answers with
//! (`ContractDescription`).

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Security Type
// =============================================================================

/// Instrument class as the gateway names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityType {
    /// Common stock / ETF.
    #[default]
    Stk,
    /// Option.
    Opt,
    /// Future.
    Fut,
    /// Forex pair.
    Cash,
    /// Index.
    Ind,
    /// Bond.
    Bond,
}

impl SecurityType {
    /// Wire code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stk => "STK",
            Self::Opt => "OPT",
            Self::Fut => "FUT",
            Self::Cash => "CASH",
            Self::Ind => "IND",
            Self::Bond => "BOND",
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STK" => Ok(Self::Stk),
            "OPT" => Ok(Self::Opt),
            "FUT" => Ok(Self::Fut),
            "CASH" => Ok(Self::Cash),
            "IND" => Ok(Self::Ind),
            "BOND" => Ok(Self::Bond),
            other => Err(format!("unknown security type: {other}")),
        }
    }
}

// =============================================================================
// Contract Spec
// =============================================================================

fn default_exchange() -> String {
    "SMART".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// The instrument a lookup or an order refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Ticker symbol.
    pub symbol: String,
    /// Instrument class.
    #[serde(default)]
    pub sec_type: SecurityType,
    /// Routing exchange.
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Listing exchange, used to disambiguate SMART-routed symbols.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_exchange: Option<String>,
    /// Trading currency.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Gateway contract id, when already known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub con_id: Option<i64>,
    /// Exchange-local symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_symbol: Option<String>,
}

impl ContractSpec {
    /// A SMART-routed USD stock.
    #[must_use]
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: SecurityType::Stk,
            exchange: default_exchange(),
            primary_exchange: None,
            currency: default_currency(),
            con_id: None,
            local_symbol: None,
        }
    }

    /// Set the listing exchange.
    #[must_use]
    pub fn with_primary_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.primary_exchange = Some(exchange.into());
        self
    }

    /// Set the known contract id.
    #[must_use]
    pub const fn with_con_id(mut self, con_id: i64) -> Self {
        self.con_id = Some(con_id);
        self
    }
}

impl fmt::Display for ContractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}@{}", self.sec_type, self.symbol, self.exchange)?;
        if let Some(primary) = &self.primary_exchange {
            write!(f, " ({primary})")?;
        }
        write!(f, " {}", self.currency)
    }
}

// =============================================================================
// Contract Description
// =============================================================================

/// One candidate returned by a contract lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDescription {
    /// Gateway contract id.
    pub con_id: i64,
    /// Ticker symbol.
    pub symbol: String,
    /// Instrument class.
    pub sec_type: SecurityType,
    /// Expiry for derivatives; empty otherwise.
    #[serde(default)]
    pub last_trade_date: String,
    /// Strike for options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<Decimal>,
    /// Option right (`C` / `P`); empty otherwise.
    #[serde(default)]
    pub right: String,
    /// Routing exchange.
    pub exchange: String,
    /// Listing exchange.
    #[serde(default)]
    pub primary_exchange: String,
    /// Trading currency.
    pub currency: String,
    /// Exchange-local symbol.
    #[serde(default)]
    pub local_symbol: String,
    /// Market name.
    #[serde(default)]
    pub market_name: String,
    /// Trading class.
    #[serde(default)]
    pub trading_class: String,
    /// Minimum price increment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tick: Option<Decimal>,
    /// Long instrument name.
    #[serde(default)]
    pub long_name: String,
}

impl ContractDescription {
    /// A `ContractSpec` addressing exactly this contract.
    #[must_use]
    pub fn to_spec(&self) -> ContractSpec {
        ContractSpec {
            symbol: self.symbol.clone(),
            sec_type: self.sec_type,
            exchange: self.exchange.clone(),
            primary_exchange: (!self.primary_exchange.is_empty())
                .then(|| self.primary_exchange.clone()),
            currency: self.currency.clone(),
            con_id: Some(self.con_id),
            local_symbol: (!self.local_symbol.is_empty()).then(|| self.local_symbol.clone()),
        }
    }
}
