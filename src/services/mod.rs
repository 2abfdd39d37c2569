//! Services module for business logic and integrations

pub mod cart;
pub mod checkout;
pub mod fulfillment;
pub mod notification;
pub mod reconciler;
pub mod ticket_document;

pub use cart::{CartService, CartView};
pub use checkout::{CheckoutRequest, CheckoutService, CustomerDetails, Selection};
pub use fulfillment::{FulfillmentEmitter, FulfillmentReport, FulfillmentService, ScanResult};
pub use notification::{ConfirmationNotice, LogNotifier, NotificationError, Notifier};
pub use reconciler::{
    ReconcileError, ReconcileOutcome, WebhookHeaders, WebhookReconciler,
};
