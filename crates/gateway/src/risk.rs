//! Pre-trade risk validation.
//!
//! A pure check over `(account, positions, order)`. The gateway consumes
//! the trait; the shipped policy enforces notional and balance limits
//! with a flat position cap.

use protocol::{Account, Order, OrderType, Position, Side};

/// Validate an order against an account and its open positions.
/// `Err` carries the client-facing rejection reason.
pub trait RiskValidator: Send + Sync {
    fn validate(
        &self,
        account: &Account,
        positions: &[Position],
        order: &Order,
    ) -> Result<(), String>;
}

/// Reference risk policy.
pub struct DefaultRiskValidator {
    max_order_notional: f64,
    max_position_qty: f64,
}

impl Default for DefaultRiskValidator {
    fn default() -> Self {
        Self {
            max_order_notional: 100_000.0,
            max_position_qty: 1_000.0,
        }
    }
}

impl DefaultRiskValidator {
    /// Order notional; market orders carry a 10% buffer since the fill
    /// price is unknown at validation time.
    fn notional(order: &Order) -> f64 {
        let base = order.qty * order.price;
        match order.order_type {
            OrderType::Market => base * 1.1,
            OrderType::Limit => base,
        }
    }

    fn current_position(symbol: &str, positions: &[Position]) -> f64 {
        positions
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.qty)
            .unwrap_or(0.0)
    }
}

impl RiskValidator for DefaultRiskValidator {
    fn validate(
        &self,
        account: &Account,
        positions: &[Position],
        order: &Order,
    ) -> Result<(), String> {
        let notional = Self::notional(order);

        if notional > self.max_order_notional {
            return Err(format!(
                "Order notional limit exceeded. Max notional: ${:.2}",
                self.max_order_notional
            ));
        }

        if order.side == Side::Buy && account.balance < notional {
            return Err(format!(
                "Insufficient balance. Required: ${notional:.2}, Available: ${:.2}",
                account.balance
            ));
        }

        // Short selling is allowed under the reference policy, so sell
        // orders skip the balance check and go straight to position caps.
        let current = Self::current_position(&order.symbol, positions);
        let new_position = match order.side {
            Side::Buy => current + order.qty,
            Side::Sell => current - order.qty,
        };
        if new_position.abs() > self.max_position_qty {
            return Err(format!(
                "Position limit exceeded. Max position: {:.0}",
                self.max_position_qty
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(balance: f64) -> Account {
        Account {
            account_id: "ACC_trader-user-123".to_string(),
            owner_user_id: "trader-user-123".to_string(),
            base_currency: "USD".to_string(),
            balance,
        }
    }

    fn order(side: Side, order_type: OrderType, qty: f64, price: f64) -> Order {
        Order {
            order_id: "ORD_1".to_string(),
            idempotency_key: "K1".to_string(),
            symbol: "BTC-USD".to_string(),
            order_type,
            side,
            qty,
            price,
        }
    }

    #[test]
    fn accepts_reasonable_limit_order() {
        let validator = DefaultRiskValidator::default();
        let result = validator.validate(
            &account(100_000.0),
            &[],
            &order(Side::Buy, OrderType::Limit, 1.0, 50_000.0),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_excessive_notional() {
        let validator = DefaultRiskValidator::default();
        let err = validator
            .validate(
                &account(1_000_000.0),
                &[],
                &order(Side::Buy, OrderType::Limit, 10.0, 50_000.0),
            )
            .unwrap_err();
        assert!(err.contains("notional"));
    }

    #[test]
    fn market_order_buffer_tips_notional_over() {
        let validator = DefaultRiskValidator::default();
        // 2 * 47_000 = 94_000 passes as a limit order but the 1.1 market
        // buffer pushes it to 103_400.
        assert!(validator
            .validate(
                &account(200_000.0),
                &[],
                &order(Side::Buy, OrderType::Limit, 2.0, 47_000.0)
            )
            .is_ok());
        assert!(validator
            .validate(
                &account(200_000.0),
                &[],
                &order(Side::Buy, OrderType::Market, 2.0, 47_000.0)
            )
            .is_err());
    }

    #[test]
    fn rejects_buy_beyond_balance() {
        let validator = DefaultRiskValidator::default();
        let err = validator
            .validate(
                &account(10_000.0),
                &[],
                &order(Side::Buy, OrderType::Limit, 1.0, 50_000.0),
            )
            .unwrap_err();
        assert!(err.contains("Insufficient balance"));
    }

    #[test]
    fn sell_skips_balance_check() {
        let validator = DefaultRiskValidator::default();
        assert!(validator
            .validate(
                &account(0.0),
                &[],
                &order(Side::Sell, OrderType::Limit, 1.0, 50_000.0)
            )
            .is_ok());
    }

    #[test]
    fn rejects_position_limit_breach() {
        let validator = DefaultRiskValidator::default();
        let positions = [Position {
            symbol: "BTC-USD".to_string(),
            qty: 995.0,
            avg_price: 40_000.0,
        }];
        let err = validator
            .validate(
                &account(1_000_000.0),
                &positions,
                &order(Side::Buy, OrderType::Limit, 10.0, 10.0),
            )
            .unwrap_err();
        assert!(err.contains("Position limit"));
    }
}
