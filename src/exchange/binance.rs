/// Binance USDT-margined perpetual futures driver
///
/// API-key/secret auth: every private call is an HMAC-SHA256 signed query
/// string with a timestamp. Per-symbol tick/step filters come from
/// exchangeInfo and are cached for the process lifetime. Hedge mode is
/// assumed, so every order carries a positionSide.
use super::cache::{TtlCache, SNAPSHOT_TTL};
use super::types::{
    AccountBalance, ExchangePosition, OpenOrder, OrderAck, OrderType, Side, SymbolRules,
};
use super::{cancel_with_retry, Exchange};
use crate::config::OrderStrategy;
use crate::errors::ExchangeError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

const BASE_URL: &str = "https://fapi.binance.com";
const VENUE: &str = "binance";
const RECV_WINDOW_MS: u64 = 5000;
const HTTP_TIMEOUT_SECS: u64 = 10;
const FILL_POLL_INTERVAL: Duration = Duration::from_secs(2);

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceFutures {
    api_key: String,
    secret_key: String,
    client: Client,
    base_url: String,
    order_strategy: OrderStrategy,
    limit_price_offset_pct: f64,
    limit_timeout_secs: u64,
    balance_cache: TtlCache<AccountBalance>,
    positions_cache: TtlCache<Vec<ExchangePosition>>,
    rules_cache: RwLock<HashMap<String, SymbolRules>>,
}

impl BinanceFutures {
    pub fn new(
        api_key: String,
        secret_key: String,
        order_strategy: OrderStrategy,
        limit_price_offset_pct: f64,
        limit_timeout_secs: u64,
    ) -> Self {
        Self::with_base_url(
            api_key,
            secret_key,
            order_strategy,
            limit_price_offset_pct,
            limit_timeout_secs,
            BASE_URL,
        )
    }

    pub fn with_base_url(
        api_key: String,
        secret_key: String,
        order_strategy: OrderStrategy,
        limit_price_offset_pct: f64,
        limit_timeout_secs: u64,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key,
            secret_key,
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            order_strategy,
            limit_price_offset_pct,
            limit_timeout_secs,
            balance_cache: TtlCache::new(SNAPSHOT_TTL),
            positions_cache: TtlCache::new(SNAPSHOT_TTL),
            rules_cache: RwLock::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Signing and transport
    // ------------------------------------------------------------------

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn map_http_error(status: u16, body: &str) -> ExchangeError {
        if status == 401 {
            return ExchangeError::Auth {
                venue: VENUE.to_string(),
                message: body.to_string(),
            };
        }
        if status == 418 || status == 429 || status >= 500 {
            return ExchangeError::Transient {
                venue: VENUE.to_string(),
                message: format!("HTTP {}: {}", status, body),
            };
        }
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("msg").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| body.to_string());
        ExchangeError::Semantic {
            venue: VENUE.to_string(),
            message,
        }
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<Value, ExchangeError> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let query = Self::build_query(&params);
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        logger::debug(
            LogTag::Exchange,
            &format!("[binance] {} {}", method.as_str(), path),
        );

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
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
            return Err(Self::map_http_error(status.as_u16(), &body));
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
            return Err(Self::map_http_error(status.as_u16(), &body));
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

    // ------------------------------------------------------------------
    // Symbol rules
    // ------------------------------------------------------------------

    async fn symbol_rules(&self, symbol: &str) -> SymbolRules {
        if let Some(rules) = self.rules_cache.read().await.get(symbol) {
            return *rules;
        }

        let rules = match self.fetch_symbol_rules(symbol).await {
            Ok(rules) => rules,
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

    async fn fetch_symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        let info = self
            .public_request("/fapi/v1/exchangeInfo", &format!("symbol={}", symbol))
            .await?;
        let symbols = info
            .get("symbols")
            .and_then(|s| s.as_array())
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                venue: VENUE.to_string(),
                symbol: symbol.to_string(),
            })?;

        let entry = symbols
            .iter()
            .find(|s| s.get("symbol").and_then(|v| v.as_str()) == Some(symbol))
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                venue: VENUE.to_string(),
                symbol: symbol.to_string(),
            })?;

        let mut rules = SymbolRules::default();
        if let Some(filters) = entry.get("filters").and_then(|f| f.as_array()) {
            for filter in filters {
                match filter.get("filterType").and_then(|t| t.as_str()) {
                    Some("PRICE_FILTER") => {
                        if let Some(tick) = str_f64(filter.get("tickSize")) {
                            rules.tick_size = tick;
                        }
                    }
                    Some("LOT_SIZE") => {
                        if let Some(step) = str_f64(filter.get("stepSize")) {
                            rules.step_size = step;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(rules)
    }

    // ------------------------------------------------------------------
    // Order placement
    // ------------------------------------------------------------------

    fn format_quantity(rules: SymbolRules, quantity: f64) -> String {
        format!("{}", rules.round_quantity(quantity))
    }

    fn format_price(rules: SymbolRules, price: f64) -> String {
        format!("{}", rules.round_price(price))
    }

    fn ack_from(value: &Value) -> OrderAck {
        OrderAck {
            order_id: value.get("orderId").and_then(|v| v.as_i64()).unwrap_or(0),
            symbol: value
                .get("symbol")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: value
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }

    async fn submit_market(
        &self,
        symbol: &str,
        order_side: &str,
        position_side: Side,
        quantity: f64,
    ) -> Result<OrderAck, ExchangeError> {
        let rules = self.symbol_rules(symbol).await;
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", order_side.to_string()),
            ("positionSide", position_side.as_position_side().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", Self::format_quantity(rules, quantity)),
        ];
        let reply = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        Ok(Self::ack_from(&reply))
    }

    async fn submit_limit(
        &self,
        symbol: &str,
        order_side: &str,
        position_side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        let rules = self.symbol_rules(symbol).await;
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", order_side.to_string()),
            ("positionSide", position_side.as_position_side().to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", Self::format_quantity(rules, quantity)),
            ("price", Self::format_price(rules, price)),
        ];
        let reply = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        Ok(Self::ack_from(&reply))
    }

    async fn order_status(&self, symbol: &str, order_id: i64) -> Result<String, ExchangeError> {
        let reply = self
            .signed_request(
                Method::GET,
                "/fapi/v1/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;
        Ok(reply
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<(), ExchangeError> {
        self.signed_request(
            Method::DELETE,
            "/fapi/v1/order",
            vec![
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    /// Entry/exit order placement honoring the configured order strategy.
    ///
    /// conservative_hybrid places a limit at the configured offset, polls for
    /// a fill until the timeout, then cancels and falls back to market.
    async fn place_with_strategy(
        &self,
        symbol: &str,
        order_side: &str,
        position_side: Side,
        quantity: f64,
    ) -> Result<OrderAck, ExchangeError> {
        match self.order_strategy {
            OrderStrategy::MarketOnly => {
                self.submit_market(symbol, order_side, position_side, quantity)
                    .await
            }
            OrderStrategy::LimitOnly | OrderStrategy::ConservativeHybrid => {
                let mark = self.get_market_price(symbol).await?;
                // Offset is signed: -0.03 places a BUY slightly below mark.
                // SELL orders mirror it so the limit always rests maker-side.
                let offset = self.limit_price_offset_pct / 100.0;
                let limit_price = if order_side == "BUY" {
                    mark * (1.0 + offset)
                } else {
                    mark * (1.0 - offset)
                };
                let ack = self
                    .submit_limit(symbol, order_side, position_side, quantity, limit_price)
                    .await?;

                if self.order_strategy == OrderStrategy::LimitOnly {
                    return Ok(ack);
                }

                let deadline = tokio::time::Instant::now()
                    + Duration::from_secs(self.limit_timeout_secs.max(1));
                while tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(FILL_POLL_INTERVAL).await;
                    match self.order_status(symbol, ack.order_id).await {
                        Ok(status) if status == "FILLED" => return Ok(ack),
                        Ok(status) if status == "CANCELED" || status == "EXPIRED" => break,
                        Ok(_) => {}
                        Err(err) => {
                            logger::warning(
                                LogTag::Exchange,
                                &format!("{} fill poll failed: {}", symbol, err),
                            );
                        }
                    }
                }

                logger::info(
                    LogTag::Exchange,
                    &format!(
                        "{} limit {} not filled within {}s, converting to market",
                        symbol, ack.order_id, self.limit_timeout_secs
                    ),
                );
                if let Err(err) = self.cancel_order(symbol, ack.order_id).await {
                    if !err.is_position_gone() {
                        logger::warning(
                            LogTag::Exchange,
                            &format!("{} cancel before market fallback: {}", symbol, err),
                        );
                    }
                }
                self.submit_market(symbol, order_side, position_side, quantity)
                    .await
            }
        }
    }

    async fn position_quantity(&self, symbol: &str, side: Side) -> Result<f64, ExchangeError> {
        let positions = self.fetch_positions().await?;
        positions
            .iter()
            .find(|p| p.symbol == symbol && p.side == side)
            .map(|p| p.quantity())
            .ok_or_else(|| ExchangeError::Semantic {
                venue: VENUE.to_string(),
                message: format!("no open position for {} {}", symbol, side),
            })
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let reply = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", vec![])
            .await?;
        let rows = reply.as_array().cloned().unwrap_or_default();
        let mut positions = Vec::new();
        for row in rows {
            let position_amt = str_f64(row.get("positionAmt")).unwrap_or(0.0);
            if position_amt == 0.0 {
                continue;
            }
            let side = if position_amt > 0.0 {
                Side::Long
            } else {
                Side::Short
            };
            positions.push(ExchangePosition {
                symbol: row
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                side,
                entry_price: str_f64(row.get("entryPrice")).unwrap_or(0.0),
                mark_price: str_f64(row.get("markPrice")).unwrap_or(0.0),
                position_amt,
                unrealized_profit: str_f64(row.get("unRealizedProfit")).unwrap_or(0.0),
                liquidation_price: str_f64(row.get("liquidationPrice")).unwrap_or(0.0),
                leverage: str_f64(row.get("leverage")).unwrap_or(10.0) as u32,
            });
        }
        Ok(positions)
    }

    async fn cancel_orders_of_type(
        &self,
        symbol: &str,
        order_type: OrderType,
    ) -> Result<(), ExchangeError> {
        let orders = self.get_open_orders(symbol).await?;
        for order in orders.iter().filter(|o| o.order_type == order_type) {
            self.cancel_order(symbol, order.order_id).await?;
        }
        Ok(())
    }

    async fn submit_protective(
        &self,
        symbol: &str,
        position_side: Side,
        quantity: f64,
        price: f64,
        order_type: OrderType,
    ) -> Result<(), ExchangeError> {
        let rules = self.symbol_rules(symbol).await;
        // Protective orders reduce the position: SELL closes longs, BUY closes shorts
        let order_side = match position_side {
            Side::Long => "SELL",
            Side::Short => "BUY",
        };
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", order_side.to_string()),
            ("positionSide", position_side.as_position_side().to_string()),
            ("type", order_type.as_str().to_string()),
            ("stopPrice", Self::format_price(rules, price)),
            ("quantity", Self::format_quantity(rules, quantity)),
            ("workingType", "MARK_PRICE".to_string()),
        ];
        self.signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        Ok(())
    }
}

fn str_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    if let Some(s) = value.as_str() {
        s.parse::<f64>().ok()
    } else {
        value.as_f64()
    }
}

#[async_trait]
impl Exchange for BinanceFutures {
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
            wallet_balance: str_f64(reply.get("totalWalletBalance")).unwrap_or(0.0),
            unrealized_profit: str_f64(reply.get("totalUnrealizedProfit")).unwrap_or(0.0),
            available_balance: str_f64(reply.get("availableBalance")).unwrap_or(0.0),
        };
        self.balance_cache.put(balance).await;
        Ok(balance)
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        if let Some(cached) = self.positions_cache.get().await {
            return Ok(cached);
        }
        let positions = self.fetch_positions().await?;
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
        let rows = reply.as_array().cloned().unwrap_or_default();
        Ok(rows
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
                quantity: str_f64(row.get("origQty")).unwrap_or(0.0),
                price: str_f64(row.get("price")).unwrap_or(0.0),
                stop_price: str_f64(row.get("stopPrice")).unwrap_or(0.0),
            })
            .collect())
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let reply = self
            .public_request("/fapi/v1/ticker/price", &format!("symbol={}", symbol))
            .await?;
        str_f64(reply.get("price")).ok_or_else(|| ExchangeError::Transient {
            venue: VENUE.to_string(),
            message: format!("no price for {}", symbol),
        })
    }

    async fn open_long(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        self.set_leverage(symbol, leverage).await?;
        let result = self
            .place_with_strategy(symbol, "BUY", Side::Long, quantity)
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
            .place_with_strategy(symbol, "SELL", Side::Short, quantity)
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
            self.place_with_strategy(symbol, "SELL", Side::Long, qty)
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
            self.place_with_strategy(symbol, "BUY", Side::Short, qty)
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
        let result = self
            .submit_protective(symbol, position_side, quantity, price, OrderType::StopMarket)
            .await;
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
        let result = self
            .submit_protective(
                symbol,
                position_side,
                quantity,
                price,
                OrderType::TakeProfitMarket,
            )
            .await;
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
        let result = self
            .signed_request(
                Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol", symbol.to_string()),
                    ("marginType", margin_type.to_string()),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // "No need to change margin type" comes back as an error code
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

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> BinanceFutures {
        BinanceFutures::new(
            "key".to_string(),
            "secret".to_string(),
            OrderStrategy::MarketOnly,
            -0.03,
            30,
        )
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let d = driver();
        let sig = d.sign("symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, d.sign("symbol=BTCUSDT&timestamp=1700000000000"));
    }

    #[test]
    fn test_query_building() {
        let query = BinanceFutures::build_query(&[
            ("symbol", "BTCUSDT".to_string()),
            ("side", "BUY".to_string()),
        ]);
        assert_eq!(query, "symbol=BTCUSDT&side=BUY");
    }

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            BinanceFutures::map_http_error(503, "down"),
            ExchangeError::Transient { .. }
        ));
        assert!(matches!(
            BinanceFutures::map_http_error(429, "slow down"),
            ExchangeError::Transient { .. }
        ));
        assert!(matches!(
            BinanceFutures::map_http_error(401, "bad key"),
            ExchangeError::Auth { .. }
        ));
        match BinanceFutures::map_http_error(400, r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
        {
            ExchangeError::Semantic { message, .. } => {
                assert_eq!(message, "Margin is insufficient.")
            }
            other => panic!("expected Semantic, got {:?}", other),
        }
    }

    #[test]
    fn test_str_f64_accepts_both_forms() {
        assert_eq!(str_f64(Some(&serde_json::json!("1.5"))), Some(1.5));
        assert_eq!(str_f64(Some(&serde_json::json!(2.5))), Some(2.5));
        assert_eq!(str_f64(Some(&serde_json::json!("x"))), None);
        assert_eq!(str_f64(None), None);
    }
}
