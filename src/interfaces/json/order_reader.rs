use crate::domain::order::Order;
use crate::error::{RefundError, Result};
use std::collections::HashSet;
use std::io::Read;

/// Reads the orders file: a JSON array of orders.
///
/// Duplicate order numbers and order line ids are rejected because refunds
/// reference both.
pub fn read_orders<R: Read>(source: R) -> Result<Vec<Order>> {
    let orders: Vec<Order> = serde_json::from_reader(source)?;

    let mut numbers = HashSet::new();
    let mut line_ids = HashSet::new();
    for order in &orders {
        if !numbers.insert(order.number.as_str()) {
            return Err(RefundError::Validation(format!(
                "Order {} appears more than once",
                order.number
            )));
        }
        if let Some(line) = order.lines.iter().find(|line| !line_ids.insert(line.id)) {
            return Err(RefundError::Validation(format!(
                "Order line {} appears more than once",
                line.id
            )));
        }
    }

    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = r#"{
        "number": "EDX-1",
        "user": {"id": 1, "username": "learner", "email": "learner@example.com"},
        "lines": [{
            "id": 1,
            "product": {"title": "Seat", "class": {"kind": "seat", "course_name": "Demo"}},
            "quantity": 1,
            "line_price_excl_tax": "50.00"
        }]
    }"#;

    #[test]
    fn test_read_orders() {
        let json = format!("[{ORDER}]");
        let orders = read_orders(json.as_bytes()).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].currency, "USD");
        assert!(orders[0].payment_source.is_none());
    }

    #[test]
    fn test_duplicate_orders_rejected() {
        let json = format!("[{ORDER}, {ORDER}]");
        assert!(matches!(
            read_orders(json.as_bytes()),
            Err(RefundError::Validation(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            read_orders("{".as_bytes()),
            Err(RefundError::Json(_))
        ));
    }
}
