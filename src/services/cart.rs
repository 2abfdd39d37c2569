//! Cart aggregation
//!
//! Lines are merged per catalog reference. Subtotals are always computed from
//! the live catalog price; prices are frozen only when checkout turns the cart
//! into an order.

use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::entities::{CartLine, CatalogRef, MAX_LINE_QUANTITY};
use crate::database::repository::{CartRepository, CatalogRepository};
use crate::database::{CommerceStore, StoreTransaction};
use crate::error::{AppError, AppResult, DomainError, ValidationError};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CartViewLine {
    pub line_id: i64,
    pub catalog_ref: CatalogRef,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub subtotal: BigDecimal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CartView {
    pub user_id: Uuid,
    pub lines: Vec<CartViewLine>,
    pub total: BigDecimal,
}

pub(crate) fn quantity_out_of_range() -> AppError {
    AppError::validation(ValidationError::OutOfRange {
        field: "quantity".to_string(),
        min: Some("1".to_string()),
        max: Some(MAX_LINE_QUANTITY.to_string()),
    })
}

/// Line quantities live in `1..=MAX_LINE_QUANTITY`.
pub(crate) fn check_line_quantity(quantity: i32) -> AppResult<()> {
    if (1..=MAX_LINE_QUANTITY).contains(&quantity) {
        Ok(())
    } else {
        Err(quantity_out_of_range())
    }
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CommerceStore>,
}

impl CartService {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    /// Merge-add: an existing line for the same reference has its quantity increased.
    pub async fn add_item(
        &self,
        user_id: Uuid,
        reference: CatalogRef,
        quantity: i32,
    ) -> AppResult<CartLine> {
        check_line_quantity(quantity)?;

        let mut tx = self.store.begin().await?;
        match tx.find_catalog_entry(reference).await? {
            Some(entry) if entry.is_active => {}
            _ => {
                return Err(AppError::domain(DomainError::CatalogItemNotFound {
                    reference: reference.to_string(),
                }))
            }
        }

        let line = tx.merge_cart_line(user_id, reference, quantity).await?;
        if line.quantity > MAX_LINE_QUANTITY {
            tx.rollback().await?;
            return Err(quantity_out_of_range());
        }
        tx.commit().await?;

        info!(
            user_id = %user_id,
            catalog_ref = %reference,
            quantity = line.quantity,
            "Cart line merged"
        );
        Ok(line)
    }

    pub async fn remove_item(&self, user_id: Uuid, line_id: i64) -> AppResult<bool> {
        let mut tx = self.store.begin().await?;
        let removed = tx.remove_cart_line(user_id, line_id).await?;
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn view(&self, user_id: Uuid) -> AppResult<CartView> {
        let mut tx = self.store.begin().await?;
        let lines = tx.cart_lines(user_id).await?;

        let mut view_lines = Vec::with_capacity(lines.len());
        let mut total = BigDecimal::from(0);
        for line in &lines {
            let (name, unit_price) = priced(tx.as_mut(), line).await?;
            let subtotal = &unit_price * BigDecimal::from(line.quantity);
            total += &subtotal;
            view_lines.push(CartViewLine {
                line_id: line.id,
                catalog_ref: line.catalog_ref()?,
                name,
                quantity: line.quantity,
                unit_price,
                subtotal,
            });
        }

        Ok(CartView {
            user_id,
            lines: view_lines,
            total,
        })
    }

    /// quantity × current product or event price.
    pub async fn subtotal(&self, line: &CartLine) -> AppResult<BigDecimal> {
        let mut tx = self.store.begin().await?;
        let (_, unit_price) = priced(tx.as_mut(), line).await?;
        Ok(unit_price * BigDecimal::from(line.quantity))
    }
}

async fn priced(tx: &mut dyn StoreTransaction, line: &CartLine) -> AppResult<(String, BigDecimal)> {
    let reference = line.catalog_ref()?;
    let entry = tx.find_catalog_entry(reference).await?.ok_or_else(|| {
        AppError::domain(DomainError::CatalogItemNotFound {
            reference: reference.to_string(),
        })
    })?;
    Ok((entry.name, entry.unit_price))
}
