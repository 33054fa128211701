//! Input validation for API requests.
//!
//! Each function returns `Err(message)` for the first problem found. Collect
//! them into an `ApiError` with `ValidationErrorBuilder` from the `error`
//! module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{
    CreateCategoryRequest, CreateProductRequest, UpdateCategoryRequest, UpdateProductRequest,
    MAX_CART_QUANTITY, MAX_STOCK,
};

use super::error::{ApiError, ValidationErrorBuilder};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 5000;

lazy_static! {
    /// Usernames: 3-64 chars of letters, digits, dot, dash and underscore
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").unwrap();
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username must be 3-64 characters of letters, digits, '.', '-' or '_'".to_string(),
        );
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password must be at most {} characters",
            MAX_PASSWORD_LEN
        ));
    }
    Ok(())
}

/// Product and category names
pub fn validate_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Name is required".to_string());
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name is too long (max {} characters)", MAX_NAME_LEN));
    }
    Ok(())
}

pub fn validate_description(description: &Option<String>) -> Result<(), String> {
    if let Some(d) = description {
        if d.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "Description is too long (max {} characters)",
                MAX_DESCRIPTION_LEN
            ));
        }
    }
    Ok(())
}

pub fn validate_stock(quantity: i64) -> Result<(), String> {
    if quantity < 0 {
        return Err("Stock quantity must not be negative".to_string());
    }
    if quantity > MAX_STOCK {
        return Err(format!("Stock quantity must be at most {}", MAX_STOCK));
    }
    Ok(())
}

pub fn validate_abv(abv: Option<f64>) -> Result<(), String> {
    match abv {
        Some(v) if !(0.0..=100.0).contains(&v) => Err("ABV must be between 0 and 100".to_string()),
        _ => Ok(()),
    }
}

pub fn validate_bottle_size(size: Option<i64>) -> Result<(), String> {
    match size {
        Some(s) if s <= 0 => Err("Bottle size must be positive".to_string()),
        _ => Ok(()),
    }
}

pub fn validate_vintage(vintage: Option<i64>) -> Result<(), String> {
    match vintage {
        Some(v) if !(1800..=9999).contains(&v) => Err("Vintage must be a four digit year".to_string()),
        _ => Ok(()),
    }
}

pub fn validate_cart_quantity(quantity: i64) -> Result<(), String> {
    if quantity < 1 || quantity > MAX_CART_QUANTITY {
        return Err(format!(
            "Quantity must be between 1 and {}",
            MAX_CART_QUANTITY
        ));
    }
    Ok(())
}

pub fn validate_id(id: i64, field: &str) -> Result<(), ApiError> {
    if id <= 0 {
        return Err(ApiError::validation_field(field, "Must be a positive id"));
    }
    Ok(())
}

pub fn validate_create_category(req: &CreateCategoryRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_name(&req.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_description(&req.description) {
        errors.add("description", e);
    }
    errors.finish()
}

pub fn validate_update_category(req: &UpdateCategoryRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        if let Err(e) = validate_name(name) {
            errors.add("name", e);
        }
    }
    if let Err(e) = validate_description(&req.description) {
        errors.add("description", e);
    }
    errors.finish()
}

pub fn validate_create_product(req: &CreateProductRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_name(&req.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_stock(req.stock_quantity) {
        errors.add("stock_quantity", e);
    }
    if let Err(e) = validate_description(&req.description) {
        errors.add("description", e);
    }
    if let Err(e) = validate_abv(req.abv) {
        errors.add("abv", e);
    }
    if let Err(e) = validate_bottle_size(req.bottle_size_ml) {
        errors.add("bottle_size_ml", e);
    }
    if let Err(e) = validate_vintage(req.vintage) {
        errors.add("vintage", e);
    }
    errors.finish()
}

pub fn validate_update_product(req: &UpdateProductRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        if let Err(e) = validate_name(name) {
            errors.add("name", e);
        }
    }
    if let Some(stock) = req.stock_quantity {
        if let Err(e) = validate_stock(stock) {
            errors.add("stock_quantity", e);
        }
    }
    if let Err(e) = validate_description(&req.description) {
        errors.add("description", e);
    }
    if let Err(e) = validate_abv(req.abv) {
        errors.add("abv", e);
    }
    if let Err(e) = validate_bottle_size(req.bottle_size_ml) {
        errors.add("bottle_size_ml", e);
    }
    if let Err(e) = validate_vintage(req.vintage) {
        errors.add("vintage", e);
    }
    errors.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Money;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("j.doe-99_x").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password("1234567").is_err());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Château Margaux").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"n".repeat(201)).is_err());
    }

    #[test]
    fn test_product_attribute_bounds() {
        assert!(validate_abv(Some(13.5)).is_ok());
        assert!(validate_abv(Some(101.0)).is_err());
        assert!(validate_abv(Some(-1.0)).is_err());
        assert!(validate_bottle_size(Some(750)).is_ok());
        assert!(validate_bottle_size(Some(0)).is_err());
        assert!(validate_vintage(Some(2015)).is_ok());
        assert!(validate_vintage(Some(15)).is_err());
        assert!(validate_cart_quantity(0).is_err());
        assert!(validate_cart_quantity(MAX_CART_QUANTITY + 1).is_err());
        assert!(validate_stock(0).is_ok());
        assert!(validate_stock(MAX_STOCK).is_ok());
        assert!(validate_stock(MAX_STOCK + 1).is_err());
        assert!(validate_stock(i64::MAX).is_err());
    }

    #[test]
    fn test_validate_create_product_collects_fields() {
        let req = CreateProductRequest {
            name: String::new(),
            price: Money::ZERO,
            stock_quantity: -1,
            category_id: None,
            description: None,
            abv: Some(200.0),
            bottle_size_ml: None,
            vintage: None,
            varietal: None,
            region: None,
            country: None,
            image_url: None,
        };
        let err = validate_create_product(&req).unwrap_err();
        assert!(err.message().contains("3 fields"));
    }
}
