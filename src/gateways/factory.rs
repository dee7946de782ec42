use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::providers::{CheckoutAdapter, DarajaAdapter};
use crate::gateways::types::PaymentRail;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Holds one constructed adapter per enabled rail.
///
/// Adapters are built once at startup and shared, so per-adapter state such
/// as the mobile-money token cache survives across requests.
pub struct GatewayRegistry {
    adapters: HashMap<PaymentRail, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn from_env() -> GatewayResult<Self> {
        let enabled_raw =
            std::env::var("ENABLED_PAYMENT_RAILS").unwrap_or_else(|_| "card,mobile_money".to_string());

        let mut adapters: HashMap<PaymentRail, Arc<dyn GatewayAdapter>> = HashMap::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let rail = PaymentRail::from_str(value)?;
            let adapter: Arc<dyn GatewayAdapter> = match rail {
                PaymentRail::Card => Arc::new(CheckoutAdapter::from_env()?),
                PaymentRail::MobileMoney => Arc::new(DarajaAdapter::from_env()?),
            };
            adapters.insert(rail, adapter);
        }

        if adapters.is_empty() {
            return Err(GatewayError::ConfigError {
                message: "ENABLED_PAYMENT_RAILS must enable at least one rail".to_string(),
            });
        }

        Ok(Self { adapters })
    }

    pub fn with_adapters(adapters: Vec<Arc<dyn GatewayAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.rail(), a)).collect(),
        }
    }

    pub fn adapter_for(&self, rail: PaymentRail) -> GatewayResult<Arc<dyn GatewayAdapter>> {
        self.adapters
            .get(&rail)
            .cloned()
            .ok_or_else(|| GatewayError::ValidationError {
                message: format!("no gateway configured for rail {}", rail),
                field: Some("payment_method".to_string()),
            })
    }

    pub fn enabled_rails(&self) -> Vec<PaymentRail> {
        self.adapters.keys().copied().collect()
    }
}
