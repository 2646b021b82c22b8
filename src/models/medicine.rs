// src/models/medicine.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use super::batch::Batch;

// ==================== MEDICINE ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Medicine {
    pub id: String,
    pub name: String,
    pub generic_name: Option<String>,
    pub dosage: Option<String>,
    pub form: Option<String>,
    pub category: Option<String>,
    pub min_stock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root: a medicine with every batch it owns loaded.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MedicineWithBatches {
    #[serde(flatten)]
    pub medicine: Medicine,
    pub batches: Vec<Batch>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateMedicineRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(length(max = 255, message = "Generic name cannot exceed 255 characters"))]
    pub generic_name: Option<String>,

    #[validate(length(max = 100, message = "Dosage cannot exceed 100 characters"))]
    pub dosage: Option<String>,

    #[validate(length(max = 100, message = "Form cannot exceed 100 characters"))]
    pub form: Option<String>,

    #[validate(length(max = 100, message = "Category cannot exceed 100 characters"))]
    pub category: Option<String>,

    #[validate(range(min = 0, message = "Minimum stock cannot be negative"))]
    pub min_stock: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMedicineRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 255, message = "Generic name cannot exceed 255 characters"))]
    pub generic_name: Option<String>,

    #[validate(length(max = 100, message = "Dosage cannot exceed 100 characters"))]
    pub dosage: Option<String>,

    #[validate(length(max = 100, message = "Form cannot exceed 100 characters"))]
    pub form: Option<String>,

    #[validate(length(max = 100, message = "Category cannot exceed 100 characters"))]
    pub category: Option<String>,

    #[validate(range(min = 0, message = "Minimum stock cannot be negative"))]
    pub min_stock: Option<i64>,
}
