//! Extraction of product and promotion data from the embedded payload
//!
//! The payload's entity cache is keyed `"<TypeName>:<id>"`. The product entry
//! is looked up by the item's identifier. The promotion is the first
//! `PromotionType:` key in document order, re-resolved through its own `id`.
//! With several promotions on a page only that first one is kept.

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

use super::error::{ExtractionError, ExtractionResult};
use crate::domain::{PriceData, ProductData, PromotionData, ResultRecord};
use crate::infrastructure::config::site;

const CACHE_POINTER: &str = "/mfe-orchestrator/props/apolloCache";
const PRODUCT_KEY_PREFIX: &str = "ProductType:";
const PROMOTION_KEY_PREFIX: &str = "PromotionType:";

/// Pure extractor: the same document always yields the same record
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    carrier_selector: Selector,
}

impl DocumentExtractor {
    pub fn new() -> ExtractionResult<Self> {
        Self::with_carrier_type(site::DATA_CARRIER_TYPE)
    }

    /// Extractor for a script element with a different `type` attribute
    pub fn with_carrier_type(carrier_type: &str) -> ExtractionResult<Self> {
        let selector = format!(r#"script[type="{carrier_type}"]"#);
        let carrier_selector =
            Selector::parse(&selector).map_err(|e| ExtractionError::InvalidSelector {
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { carrier_selector })
    }

    /// `None` when the page has no usable data
    pub fn extract(&self, document: &str, item_id: &str) -> Option<ResultRecord> {
        match self.try_extract(document, item_id) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("No record for {}: {}", item_id, e);
                None
            }
        }
    }

    pub fn try_extract(&self, document: &str, item_id: &str) -> ExtractionResult<ResultRecord> {
        let payload = self.carrier_payload(document)?;
        let root: Value = serde_json::from_str(&payload).map_err(ExtractionError::malformed_payload)?;
        let cache = root
            .pointer(CACHE_POINTER)
            .and_then(Value::as_object)
            .ok_or(ExtractionError::MissingCache)?;

        let product_key = format!("{PRODUCT_KEY_PREFIX}{item_id}");
        let product = match cache.get(&product_key) {
            Some(Value::Object(entry)) => entry,
            Some(_) => return Err(ExtractionError::malformed_entry(&product_key)),
            None => return Err(ExtractionError::MissingProduct { key: product_key }),
        };

        Ok(ResultRecord {
            product_data: Some(project_product(product)),
            promotion_data: resolve_promotion(cache)?,
        })
    }

    fn carrier_payload(&self, document: &str) -> ExtractionResult<String> {
        let html = Html::parse_document(document);
        let carrier = html
            .select(&self.carrier_selector)
            .next()
            .ok_or(ExtractionError::CarrierMissing)?;

        let text: String = carrier.text().collect();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ExtractionError::EmptyCarrier);
        }
        Ok(trimmed.to_string())
    }
}

fn field(entry: &Map<String, Value>, name: &str) -> Value {
    entry.get(name).cloned().unwrap_or(Value::Null)
}

fn project_product(entry: &Map<String, Value>) -> ProductData {
    // no price object at all still yields a product, with null price fields
    let price = match entry.get("price") {
        Some(Value::Object(price)) => PriceData {
            actual: field(price, "actual"),
            unit_price: field(price, "unitPrice"),
            unit_of_measure: field(price, "unitOfMeasure"),
        },
        _ => PriceData::default(),
    };

    ProductData {
        id: field(entry, "id"),
        title: field(entry, "title"),
        description: field(entry, "description"),
        bulk_buy_limit: field(entry, "bulkBuyLimit"),
        status: field(entry, "status"),
        price,
    }
}

fn project_promotion(entry: &Map<String, Value>) -> PromotionData {
    PromotionData {
        id: field(entry, "id"),
        start_date: field(entry, "startDate"),
        end_date: field(entry, "endDate"),
        description: field(entry, "description"),
        unit_selling_info: field(entry, "unitSellingInfo"),
    }
}

fn resolve_promotion(cache: &Map<String, Value>) -> ExtractionResult<Option<PromotionData>> {
    let Some((stub_key, stub)) = cache
        .iter()
        .find(|(key, _)| key.starts_with(PROMOTION_KEY_PREFIX))
    else {
        return Ok(None);
    };
    if is_blank(stub) {
        return Ok(None);
    }

    let promotion_id = match stub.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(ExtractionError::PromotionWithoutId {
                key: stub_key.clone(),
            });
        }
    };

    let promotion_key = format!("{PROMOTION_KEY_PREFIX}{promotion_id}");
    match cache.get(&promotion_key) {
        Some(entry) if is_blank(entry) => Ok(None),
        Some(Value::Object(entry)) => Ok(Some(project_promotion(entry))),
        None => Ok(None),
        Some(_) => Err(ExtractionError::malformed_entry(&promotion_key)),
    }
}

/// `null` and `{}` both mean "no promotion"
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
