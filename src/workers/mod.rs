pub mod pending_order_monitor;
