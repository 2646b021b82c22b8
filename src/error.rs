// src/error.rs
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    ValidationError(String),
    InsufficientStock(String),
    DataUnavailable(String),
    DatabaseError(sqlx::Error),
    InternalServerError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::InsufficientStock(msg) => write!(f, "Insufficient Stock: {}", msg),
            ApiError::DataUnavailable(msg) => write!(f, "Data Unavailable: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Conflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::InsufficientStock(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::DataUnavailable(_) => HttpResponse::ServiceUnavailable().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                log::error!("Inventory store unreachable: {}", err);
                ApiError::DataUnavailable("Inventory data is temporarily unavailable".to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::Database(db_err)
                if db_err.is_check_violation() || db_err.is_foreign_key_violation() =>
            {
                ApiError::BadRequest(db_err.message().to_string())
            }
            _ => ApiError::DatabaseError(err),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

// Domain-specific constructors
impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn medicine_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Medicine with ID '{}' not found", id))
    }

    pub fn batch_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Batch with ID '{}' not found", id))
    }

    pub fn supplier_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Supplier with ID '{}' not found", id))
    }

    pub fn medicine_already_exists(name: &str) -> Self {
        ApiError::Conflict(format!("Medicine '{}' already exists", name))
    }

    pub fn insufficient_stock(batch_number: &str, requested: i64) -> Self {
        ApiError::InsufficientStock(format!(
            "Batch '{}' cannot supply {} units",
            batch_number, requested
        ))
    }
}

/// Largest quantity a single batch may hold.
pub const MAX_QUANTITY: i64 = 1_000_000_000;

pub fn validate_quantity(quantity: i64) -> Result<(), ApiError> {
    if quantity < 0 {
        return Err(ApiError::ValidationError("Quantity cannot be negative".to_string()));
    }
    if quantity > MAX_QUANTITY {
        return Err(ApiError::ValidationError("Quantity too large".to_string()));
    }
    Ok(())
}

pub fn validate_price(field: &str, price: f64) -> Result<(), ApiError> {
    if !price.is_finite() || price < 0.0 {
        return Err(ApiError::ValidationError(format!(
            "{} must be a non-negative number",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::not_found("Sale").error_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::medicine_already_exists("Paracetamol").error_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::insufficient_stock("LOT-1", 5).error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::DataUnavailable("down".into()).error_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_pool_timeout_maps_to_data_unavailable() {
        let err: ApiError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, ApiError::DataUnavailable(_)));

        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ApiError::DatabaseError(_)));
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(0).is_ok());
        assert!(validate_quantity(25).is_ok());
        assert!(validate_quantity(-1).is_err());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price("sell_price", 0.0).is_ok());
        assert!(validate_price("sell_price", 12.5).is_ok());
        assert!(validate_price("sell_price", -0.01).is_err());
        assert!(validate_price("sell_price", f64::NAN).is_err());
    }
}
