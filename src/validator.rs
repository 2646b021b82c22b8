// src/validator.rs - Cross-field validation that derive(Validate) cannot express
use std::collections::{HashMap, HashSet};
use serde::Serialize;
use regex::Regex;
use lazy_static::lazy_static;
use chrono::{DateTime, Utc};
use crate::error::ApiError;
use crate::models::{
    Batch, CreateBatchRequest, CreateSaleRequest, CreateSupplierRequest, UpdateBatchRequest,
    UpdateSupplierRequest,
};
use crate::normalize::BatchRecord;

lazy_static! {
    static ref BATCH_NUMBER_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/\- ]*$").expect("batch number pattern");
    static ref PHONE_REGEX: Regex =
        Regex::new(r"^\+?[0-9][0-9 ().\-]{3,}$").expect("phone pattern");
}

// ==================== VALIDATION RESULT ====================

#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    pub errors: HashMap<String, Vec<String>>,
    pub warnings: HashMap<String, Vec<String>>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        for (field, errors) in other.errors {
            self.errors.entry(field).or_default().extend(errors);
        }
        for (field, warnings) in other.warnings {
            self.warnings.entry(field).or_default().extend(warnings);
        }
    }

    pub fn error_message(&self) -> String {
        let mut fields: Vec<_> = self.errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));

        fields
            .iter()
            .map(|(field, errors)| format!("{}: {}", field, errors.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::ValidationError(self.error_message())
    }

    /// Logs warnings and turns errors into an `ApiError`.
    pub fn into_result(self) -> Result<(), ApiError> {
        for (field, warnings) in &self.warnings {
            for warning in warnings {
                log::warn!("{}: {}", field, warning);
            }
        }

        if self.is_valid() {
            Ok(())
        } else {
            Err(self.to_api_error())
        }
    }
}

// ==================== FIELD VALIDATORS ====================

pub struct FieldValidator;

impl FieldValidator {
    pub fn batch_number(value: &str) -> Result<(), String> {
        if BATCH_NUMBER_REGEX.is_match(value.trim()) {
            Ok(())
        } else {
            Err("Batch number may only contain letters, digits, spaces and . _ / -".to_string())
        }
    }

    pub fn phone(value: &str) -> Result<(), String> {
        if value.trim().is_empty() || PHONE_REGEX.is_match(value.trim()) {
            Ok(())
        } else {
            Err("Invalid phone number format".to_string())
        }
    }

    /// Manufacturing must not come after expiry, receipt must not precede manufacturing.
    pub fn batch_dates(
        manufacturing: Option<DateTime<Utc>>,
        expiry: Option<DateTime<Utc>>,
        received: Option<DateTime<Utc>>,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let (Some(made), Some(expires)) = (manufacturing, expiry) {
            if made > expires {
                result.add_error("expiry_date", "Expiry date is before the manufacturing date");
            }
        }

        if let (Some(made), Some(received)) = (manufacturing, received) {
            if received < made {
                result.add_error("received_date", "Received date is before the manufacturing date");
            }
        }

        result
    }

    pub fn prices(purchase_price: f64, sell_price: f64) -> ValidationResult {
        let mut result = ValidationResult::new();
        if sell_price < purchase_price {
            result.add_warning(
                "sell_price",
                format!("Sell price {:.2} is below purchase price {:.2}", sell_price, purchase_price),
            );
        }
        result
    }
}

// ==================== CUSTOM VALIDATION ====================

pub trait CustomValidate {
    fn custom_validate(&self) -> ValidationResult;
}

impl CustomValidate for CreateBatchRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = FieldValidator::batch_number(&self.batch_number) {
            result.add_error("batch_number", e);
        }

        result.merge(FieldValidator::batch_dates(
            self.manufacturing_date,
            self.expiry_date,
            self.received_date,
        ));
        result.merge(FieldValidator::prices(self.purchase_price, self.sell_price));

        result
    }
}

impl CustomValidate for BatchRecord {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = FieldValidator::batch_number(&self.batch_number) {
            result.add_error("batch_number", e);
        }

        result.merge(FieldValidator::batch_dates(
            self.manufacturing_date,
            self.expiry_date,
            self.received_date,
        ));

        result
    }
}

fn check_phone(phone: Option<&str>) -> ValidationResult {
    let mut result = ValidationResult::new();
    if let Some(phone) = phone {
        if let Err(e) = FieldValidator::phone(phone) {
            result.add_error("phone", e);
        }
    }
    result
}

impl CustomValidate for CreateSupplierRequest {
    fn custom_validate(&self) -> ValidationResult {
        check_phone(self.phone.as_deref())
    }
}

impl CustomValidate for UpdateSupplierRequest {
    fn custom_validate(&self) -> ValidationResult {
        check_phone(self.phone.as_deref())
    }
}

impl CustomValidate for CreateSaleRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.batch_id.as_str()) {
                result.add_error(
                    "items",
                    format!("Batch '{}' is listed more than once", item.batch_id),
                );
            }
        }

        result
    }
}

// ==================== BUSINESS VALIDATORS ====================

pub struct BusinessValidator;

impl BusinessValidator {
    /// Checks an update against the batch it will be applied to.
    pub fn validate_batch_update(existing: &Batch, update: &UpdateBatchRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Some(ref number) = update.batch_number {
            if let Err(e) = FieldValidator::batch_number(number) {
                result.add_error("batch_number", e);
            }
        }

        result.merge(FieldValidator::batch_dates(
            update.manufacturing_date.or(existing.manufacturing_date),
            update.expiry_date.or(existing.expiry_date),
            update.received_date.or(existing.received_date),
        ));
        result.merge(FieldValidator::prices(
            update.purchase_price.unwrap_or(existing.purchase_price),
            update.sell_price.unwrap_or(existing.sell_price),
        ));

        result
    }

    pub fn validate_sale_quantity(batch: &Batch, requested: i64) -> ValidationResult {
        let mut result = ValidationResult::new();

        if requested <= 0 {
            result.add_error("quantity", "Requested quantity must be positive");
        } else if requested > batch.quantity {
            result.add_error(
                "quantity",
                format!(
                    "Insufficient stock in batch {}. Available: {}, Requested: {}",
                    batch.batch_number, batch.quantity, requested
                ),
            );
        }

        if let Some(expiry) = batch.expiry_date {
            if expiry < Utc::now() {
                result.add_warning("batch", format!("Batch {} is past its expiry date", batch.batch_number));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateSaleItemRequest;
    use crate::models::PaymentMethod;
    use chrono::Duration;

    fn batch_request() -> CreateBatchRequest {
        CreateBatchRequest {
            medicine_id: "m1".to_string(),
            batch_number: "LOT-2024/01".to_string(),
            quantity: 10,
            purchase_price: 2.0,
            sell_price: 3.0,
            manufacturing_date: Some(Utc::now() - Duration::days(30)),
            expiry_date: Some(Utc::now() + Duration::days(300)),
            received_date: Some(Utc::now()),
            supplier_id: None,
        }
    }

    #[test]
    fn test_valid_batch_request() {
        let result = batch_request().custom_validate();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_expiry_before_manufacturing_rejected() {
        let mut request = batch_request();
        request.expiry_date = Some(Utc::now() - Duration::days(60));
        let result = request.custom_validate();
        assert!(result.errors.contains_key("expiry_date"));
    }

    #[test]
    fn test_received_before_manufacturing_rejected() {
        let mut request = batch_request();
        request.received_date = Some(Utc::now() - Duration::days(90));
        assert!(request.custom_validate().errors.contains_key("received_date"));
    }

    #[test]
    fn test_selling_below_cost_is_only_a_warning() {
        let mut request = batch_request();
        request.sell_price = 1.0;
        let result = request.custom_validate();
        assert!(result.is_valid());
        assert!(result.warnings.contains_key("sell_price"));
    }

    #[test]
    fn test_batch_number_format() {
        assert!(FieldValidator::batch_number("A1-B2").is_ok());
        assert!(FieldValidator::batch_number("-leading").is_err());
        assert!(FieldValidator::batch_number("semi;colon").is_err());
    }

    #[test]
    fn test_duplicate_sale_batches_rejected() {
        let item = CreateSaleItemRequest {
            batch_id: "b1".to_string(),
            quantity: 1,
            unit_price: None,
        };
        let request = CreateSaleRequest {
            customer_name: None,
            prescription_id: None,
            payment_method: PaymentMethod::Cash,
            items: vec![item.clone(), item],
        };
        let err = request.custom_validate().into_result().unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_phone_format() {
        assert!(FieldValidator::phone("+33 1 23 45 67 89").is_ok());
        assert!(FieldValidator::phone("").is_ok());
        assert!(FieldValidator::phone("call me").is_err());
    }

    #[test]
    fn test_supplier_update_checks_phone() {
        let update = UpdateSupplierRequest {
            name: None,
            contact: None,
            phone: Some("call me".to_string()),
            email: None,
            address: None,
        };
        assert!(update.custom_validate().errors.contains_key("phone"));

        let untouched = UpdateSupplierRequest { phone: None, ..update };
        assert!(untouched.custom_validate().is_valid());
    }
}
