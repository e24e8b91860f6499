use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One page of the public transfer listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPage {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub page_size: i64,
    #[serde(default)]
    pub data: Vec<Transfer>,
}

/// A stock transfer between two branches, with its line items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: i64,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub from_branch_id: i64,
    #[serde(default)]
    pub to_branch_id: i64,
    #[serde(default)]
    pub status: i64,
    #[serde(default, with = "kiotviet_time")]
    pub dispatched_date: Option<NaiveDateTime>,
    #[serde(default, with = "kiotviet_time")]
    pub received_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub retailer_id: i64,
    /// Note written when the transfer was sent.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transfer_details: Vec<TransferLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLine {
    #[serde(default)]
    pub product_id: i64,
    #[serde(default)]
    pub product_code: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub send_quantity: f64,
    #[serde(default)]
    pub receive_quantity: f64,
    #[serde(default)]
    pub send_price: f64,
    #[serde(default)]
    pub receive_price: f64,
    #[serde(default)]
    pub price: f64,
}

/// Back office view of a transfer's lines, listed in the same order as
/// [`Transfer::transfer_details`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferDetails {
    #[serde(rename = "Data", default)]
    pub data: Vec<TransferLineDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferLineDetail {
    #[serde(default)]
    pub serial_numbers: Option<String>,
    #[serde(default)]
    pub receive_serial_numbers: Option<String>,
    #[serde(default)]
    pub product: Option<DetailProduct>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailProduct {
    #[serde(rename = "Barcode", default)]
    pub barcode: Option<String>,
}

/// Timestamps are local wall clock times without an offset, with optional fractional seconds.
mod kiotviet_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.collect_str(&value.format(FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;

        value
            .filter(|value| !value.is_empty())
            .map(|value| {
                NaiveDateTime::parse_from_str(&value, FORMAT).map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
