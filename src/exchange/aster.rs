/// Aster perpetual DEX driver (web3 agent-wallet auth)
///
/// The venue speaks a Binance-compatible REST dialect but authenticates with
/// an agent wallet: requests carry the main wallet address (`user`), the API
/// wallet address (`signer`) and a recoverable secp256k1 signature produced
/// by the API wallet key over the Keccak digest of the canonical query
/// string. No API secret ever leaves the process.
use super::cache::{TtlCache, SNAPSHOT_TTL};
use super::types::{
    AccountBalance, ExchangePosition, OpenOrder, OrderAck, OrderType, Side, SymbolRules,
};
use super::{cancel_with_retry, Exchange};
use crate::errors::ExchangeError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::SigningKey;
use reqwest::{Client, Method};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

const BASE_URL: &str = "https://fapi.asterdex.com";
const VENUE: &str = "aster";
const HTTP_TIMEOUT_SECS: u64 = 10;

pub struct AsterDex {
    user: String,
    signer: String,
    private_key: String,
    client: Client,
    base_url: String,
    balance_cache: TtlCache<AccountBalance>,
    positions_cache: TtlCache<Vec<ExchangePosition>>,
    rules_cache: RwLock<HashMap<String, SymbolRules>>,
}

impl AsterDex {
    pub fn new(user: String, signer: String, private_key: String) -> Self {
        Self {
            user,
            signer,
            private_key,
            client: Client::new(),
            base_url: BASE_URL.to_string(),
            balance_cache: TtlCache::new(SNAPSHOT_TTL),
            positions_cache: TtlCache::new(SNAPSHOT_TTL),
            rules_cache: RwLock::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Agent-wallet signing
    // ------------------------------------------------------------------

    /// Canonical form: params sorted by key, joined k=v with '&'
    fn canonicalize(params: &[(&str, String)]) -> String {
        let mut sorted: Vec<_> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn sign_payload(&self, canonical: &str) -> Result<String, ExchangeError> {
        let key_hex = self
            .private_key
            .strip_prefix("0x")
            .unwrap_or(&self.private_key);
        let key_bytes = hex::decode(key_hex).map_err(|e| ExchangeError::Auth {
            venue: VENUE.to_string(),
            message: format!("invalid private key hex: {}", e),
        })?;
        let signing_key = SigningKey::from_slice(&key_bytes).map_err(|e| ExchangeError::Auth {
            venue: VENUE.to_string(),
            message: format!("invalid private key: {}", e),
        })?;

        let mut hasher = Keccak256::new();
        hasher.update(canonical.as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();

        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| ExchangeError::Auth {
                venue: VENUE.to_string(),
                message: format!("signing failed: {}", e),
            })?;

        let mut sig_bytes = Vec::with_capacity(65);
        sig_bytes.extend_from_slice(&signature.r().to_bytes());
        sig_bytes.extend_from_slice(&signature.s().to_bytes());
        sig_bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(sig_bytes)))
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<Value, ExchangeError> {
        params.push(("user", self.user.clone()));
        params.push(("signer", self.signer.clone()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let canonical = Self::canonicalize(&params);
        let signature = self.sign_payload(&canonical)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, canonical, signature
        );

        logger::debug(
            LogTag::Exchange,
            &format!("[aster] {} {}", method.as_str(), path),
        );

        let response = self
            .client
            .request(method, &url)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| ExchangeError::Transient {
                venue: VENUE.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            if status.as_u16() == 429 || status.as_u16() >= 500 {
                return Err(ExchangeError::Transient {
                    venue: VENUE.to_string(),
                    message: format!("HTTP {}: {}", status, body),
                });
            }
            if status.as_u16() == 401 {
                return Err(ExchangeError::Auth {
                    venue: VENUE.to_string(),
                    message: body,
                });
            }
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("msg").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(body);
            return Err(ExchangeError::Semantic {
                venue: VENUE.to_string(),
                message,
            });
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Transient {
            venue: VENUE.to_string(),
            message: format!("decode: {}", e),
        })
    }

    async fn public_request(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| ExchangeError::Transient {
                venue: VENUE.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ExchangeError::Transient {
                venue: VENUE.to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Transient {
            venue: VENUE.to_string(),
            message: format!("decode: {}", e),
        })
    }

    async fn invalidate_caches(&self) {
        self.balance_cache.invalidate().await;
        self.positions_cache.invalidate().await;
    }

    async fn symbol_rules(&self, symbol: &str) -> SymbolRules {
        if let Some(rules) = self.rules_cache.read().await.get(symbol) {
            return *rules;
        }
        let rules = match self
            .public_request("/fapi/v1/exchangeInfo", &format!("symbol={}", symbol))
            .await
        {
            Ok(info) => parse_rules(&info, symbol).unwrap_or_default(),
            Err(err) => {
                logger::warning(
                    LogTag::Exchange,
                    &format!("{} filters unavailable ({}), using defaults", symbol, err),
                );
                SymbolRules::default()
            }
        };
        self.rules_cache
            .write()
            .await
            .insert(symbol.to_string(), rules);
        rules
    }

    async fn submit_order(
        &self,
        symbol: &str,
        order_side: &str,
        position_side: Side,
        order_type: OrderType,
        quantity: f64,
        stop_price: Option<f64>,
    ) -> Result<OrderAck, ExchangeError> {
        let rules = self.symbol_rules(symbol).await;
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", order_side.to_string()),
            ("positionSide", position_side.as_position_side().to_string()),
            ("type", order_type.as_str().to_string()),
            ("quantity", format!("{}", rules.round_quantity(quantity))),
        ];
        if let Some(stop) = stop_price {
            params.push(("stopPrice", format!("{}", rules.round_price(stop))));
            params.push(("workingType", "MARK_PRICE".to_string()));
        }
        let reply = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        Ok(OrderAck {
            order_id: reply.get("orderId").and_then(|v| v.as_i64()).unwrap_or(0),
            symbol: symbol.to_string(),
            status: reply
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn position_quantity(&self, symbol: &str, side: Side) -> Result<f64, ExchangeError> {
        self.get_positions()
            .await?
            .iter()
            .find(|p| p.symbol == symbol && p.side == side)
            .map(|p| p.quantity())
            .ok_or_else(|| ExchangeError::Semantic {
                venue: VENUE.to_string(),
                message: format!("no open position for {} {}", symbol, side),
            })
    }

    async fn cancel_orders_of_type(
        &self,
        symbol: &str,
        order_type: OrderType,
    ) -> Result<(), ExchangeError> {
        let orders = self.get_open_orders(symbol).await?;
        for order in orders.iter().filter(|o| o.order_type == order_type) {
            self.signed_request(
                Method::DELETE,
                "/fapi/v1/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", order.order_id.to_string()),
                ],
            )
            .await?;
        }
        Ok(())
    }
}

fn num(value: Option<&Value>) -> f64 {
    match value {
        Some(v) => {
            if let Some(s) = v.as_str() {
                s.parse().unwrap_or(0.0)
            } else {
                v.as_f64().unwrap_or(0.0)
            }
        }
        None => 0.0,
    }
}

fn parse_rules(info: &Value, symbol: &str) -> Option<SymbolRules> {
    let entry = info
        .get("symbols")?
        .as_array()?
        .iter()
        .find(|s| s.get("symbol").and_then(|v| v.as_str()) == Some(symbol))?;
    let mut rules = SymbolRules::default();
    for filter in entry.get("filters")?.as_array()? {
        match filter.get("filterType").and_then(|t| t.as_str()) {
            Some("PRICE_FILTER") => {
                let tick = num(filter.get("tickSize"));
                if tick > 0.0 {
                    rules.tick_size = tick;
                }
            }
            Some("LOT_SIZE") => {
                let step = num(filter.get("stepSize"));
                if step > 0.0 {
                    rules.step_size = step;
                }
            }
            _ => {}
        }
    }
    Some(rules)
}

#[async_trait]
impl Exchange for AsterDex {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn get_balance(&self) -> Result<AccountBalance, ExchangeError> {
        if let Some(cached) = self.balance_cache.get().await {
            return Ok(cached);
        }
        let reply = self
            .signed_request(Method::GET, "/fapi/v2/account", vec![])
            .await?;
        let balance = AccountBalance {
            wallet_balance: num(reply.get("totalWalletBalance")),
            unrealized_profit: num(reply.get("totalUnrealizedProfit")),
            available_balance: num(reply.get("availableBalance")),
        };
        self.balance_cache.put(balance).await;
        Ok(balance)
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        if let Some(cached) = self.positions_cache.get().await {
            return Ok(cached);
        }
        let reply = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", vec![])
            .await?;
        let mut positions = Vec::new();
        for row in reply.as_array().cloned().unwrap_or_default() {
            let position_amt = num(row.get("positionAmt"));
            if position_amt == 0.0 {
                continue;
            }
            positions.push(ExchangePosition {
                symbol: row
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                side: if position_amt > 0.0 {
                    Side::Long
                } else {
                    Side::Short
                },
                entry_price: num(row.get("entryPrice")),
                mark_price: num(row.get("markPrice")),
                position_amt,
                unrealized_profit: num(row.get("unRealizedProfit")),
                liquidation_price: num(row.get("liquidationPrice")),
                leverage: num(row.get("leverage")) as u32,
            });
        }
        self.positions_cache.put(positions.clone()).await;
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let params = if symbol.is_empty() {
            vec![]
        } else {
            vec![("symbol", symbol.to_string())]
        };
        let reply = self
            .signed_request(Method::GET, "/fapi/v1/openOrders", params)
            .await?;
        Ok(reply
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|row| OpenOrder {
                symbol: row
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                order_id: row.get("orderId").and_then(|v| v.as_i64()).unwrap_or(0),
                order_type: OrderType::from_venue_str(
                    row.get("type").and_then(|v| v.as_str()).unwrap_or(""),
                ),
                side: row
                    .get("side")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                position_side: row
                    .get("positionSide")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                quantity: num(row.get("origQty")),
                price: num(row.get("price")),
                stop_price: num(row.get("stopPrice")),
            })
            .collect())
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let reply = self
            .public_request("/fapi/v1/ticker/price", &format!("symbol={}", symbol))
            .await?;
        let price = num(reply.get("price"));
        if price <= 0.0 {
            return Err(ExchangeError::Transient {
                venue: VENUE.to_string(),
                message: format!("no price for {}", symbol),
            });
        }
        Ok(price)
    }

    async fn open_long(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        self.set_leverage(symbol, leverage).await?;
        let result = self
            .submit_order(symbol, "BUY", Side::Long, OrderType::Market, quantity, None)
            .await;
        self.invalidate_caches().await;
        result
    }

    async fn open_short(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        self.set_leverage(symbol, leverage).await?;
        let result = self
            .submit_order(
                symbol,
                "SELL",
                Side::Short,
                OrderType::Market,
                quantity,
                None,
            )
            .await;
        self.invalidate_caches().await;
        result
    }

    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExchangeError> {
        let result = async {
            let qty = if quantity > 0.0 {
                quantity
            } else {
                self.position_quantity(symbol, Side::Long).await?
            };
            self.submit_order(symbol, "SELL", Side::Long, OrderType::Market, qty, None)
                .await
        }
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExchangeError> {
        let result = async {
            let qty = if quantity > 0.0 {
                quantity
            } else {
                self.position_quantity(symbol, Side::Short).await?
            };
            self.submit_order(symbol, "BUY", Side::Short, OrderType::Market, qty, None)
                .await
        }
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn set_stop_loss(
        &self,
        symbol: &str,
        position_side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<(), ExchangeError> {
        let order_side = match position_side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };
        let result = self
            .submit_order(
                symbol,
                order_side,
                position_side,
                OrderType::StopMarket,
                quantity,
                Some(price),
            )
            .await
            .map(|_| ());
        self.invalidate_caches().await;
        result
    }

    async fn set_take_profit(
        &self,
        symbol: &str,
        position_side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<(), ExchangeError> {
        let order_side = match position_side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };
        let result = self
            .submit_order(
                symbol,
                order_side,
                position_side,
                OrderType::TakeProfitMarket,
                quantity,
                Some(price),
            )
            .await
            .map(|_| ());
        self.invalidate_caches().await;
        result
    }

    async fn cancel_stop_loss_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let result = cancel_with_retry("cancel stop-loss orders", || {
            self.cancel_orders_of_type(symbol, OrderType::StopMarket)
        })
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn cancel_take_profit_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let result = cancel_with_retry("cancel take-profit orders", || {
            self.cancel_orders_of_type(symbol, OrderType::TakeProfitMarket)
        })
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let result = cancel_with_retry("cancel all orders", || async move {
            self.signed_request(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
            Ok(())
        })
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> Result<(), ExchangeError> {
        let margin_type = if is_cross { "CROSSED" } else { "ISOLATED" };
        match self
            .signed_request(
                Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol", symbol.to_string()),
                    ("marginType", margin_type.to_string()),
                ],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(ExchangeError::Semantic { message, .. })
                if message.to_lowercase().contains("no need to change") =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.signed_request(
            Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}
