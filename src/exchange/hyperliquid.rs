/// Hyperliquid perpetual DEX driver (signed-wallet auth)
///
/// Reads go through the public /info endpoint; every write is an action
/// payload signed locally with the wallet key using the venue's EIP-712
/// agent scheme: the action bytes and nonce are committed into a
/// `connectionId`, hashed as an `Agent(string source,bytes32 connectionId)`
/// struct under the exchange signing domain, prefixed per EIP-712 and signed
/// with a recoverable secp256k1 signature. The venue keys markets by coin
/// name, so engine symbols are mapped by stripping the USDT suffix. Size
/// decimals come from the venue metadata; price decimals follow the venue's
/// 6-minus-size-decimals convention.
use super::cache::{TtlCache, SNAPSHOT_TTL};
use super::types::{AccountBalance, ExchangePosition, OpenOrder, OrderAck, OrderType, Side};
use super::{cancel_with_retry, Exchange};
use crate::errors::ExchangeError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::SigningKey;
use reqwest::Client;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

const MAINNET_URL: &str = "https://api.hyperliquid.xyz";
const TESTNET_URL: &str = "https://api.hyperliquid-testnet.xyz";
const VENUE: &str = "hyperliquid";
const HTTP_TIMEOUT_SECS: u64 = 10;

// EIP-712 signing domain for agent-signed exchange actions. The venue signs
// against a fixed chain id and the zero verifying contract regardless of the
// network; mainnet and testnet differ only in the agent source tag.
const DOMAIN_NAME: &str = "Exchange";
const DOMAIN_VERSION: &str = "1";
const SIGNING_CHAIN_ID: u64 = 1337;
const AGENT_SOURCE_MAINNET: &str = "a";
const AGENT_SOURCE_TESTNET: &str = "b";

/// Per-coin trading rules from venue metadata
#[derive(Debug, Clone, Copy)]
struct CoinMeta {
    asset_index: u32,
    size_decimals: u32,
}

pub struct HyperliquidDex {
    private_key: String,
    wallet_addr: String,
    client: Client,
    base_url: String,
    /// "a" on mainnet, "b" on testnet; part of the signed Agent struct
    agent_source: &'static str,
    balance_cache: TtlCache<AccountBalance>,
    positions_cache: TtlCache<Vec<ExchangePosition>>,
    meta_cache: RwLock<HashMap<String, CoinMeta>>,
    /// Last leverage/margin settings per coin; the venue updates both in one
    /// call so each setter replays the other half
    margin_state: RwLock<HashMap<String, (u32, bool)>>,
}

impl HyperliquidDex {
    pub fn new(private_key: String, wallet_addr: String, testnet: bool) -> Self {
        let (base_url, agent_source) = if testnet {
            (TESTNET_URL, AGENT_SOURCE_TESTNET)
        } else {
            (MAINNET_URL, AGENT_SOURCE_MAINNET)
        };
        Self {
            private_key,
            wallet_addr,
            client: Client::new(),
            base_url: base_url.to_string(),
            agent_source,
            balance_cache: TtlCache::new(SNAPSHOT_TTL),
            positions_cache: TtlCache::new(SNAPSHOT_TTL),
            meta_cache: RwLock::new(HashMap::new()),
            margin_state: RwLock::new(HashMap::new()),
        }
    }

    fn coin_for_symbol(symbol: &str) -> &str {
        symbol.strip_suffix("USDT").unwrap_or(symbol)
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    async fn post(&self, path: &str, body: Value) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        logger::debug(LogTag::Exchange, &format!("[hyperliquid] POST {}", path));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| ExchangeError::Transient {
                venue: VENUE.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            if status.as_u16() == 429 || status.as_u16() >= 500 {
                return Err(ExchangeError::Transient {
                    venue: VENUE.to_string(),
                    message: format!("HTTP {}: {}", status, text),
                });
            }
            return Err(ExchangeError::Semantic {
                venue: VENUE.to_string(),
                message: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| ExchangeError::Transient {
            venue: VENUE.to_string(),
            message: format!("decode: {}", e),
        })
    }

    async fn info(&self, body: Value) -> Result<Value, ExchangeError> {
        self.post("/info", body).await
    }

    /// Sign an action payload and post it to /exchange.
    /// The venue rejects stale nonces, so each action uses the current
    /// millisecond clock.
    async fn post_signed_action(&self, action: Value) -> Result<Value, ExchangeError> {
        let nonce = Utc::now().timestamp_millis();
        let signature = self.sign_action(&action, nonce)?;
        let reply = self
            .post(
                "/exchange",
                json!({
                    "action": action,
                    "nonce": nonce,
                    "signature": signature,
                }),
            )
            .await?;

        // Action-level failures come back inside a 200 body
        if reply.get("status").and_then(|s| s.as_str()) == Some("err") {
            let message = reply
                .get("response")
                .and_then(|r| r.as_str())
                .unwrap_or("action rejected")
                .to_string();
            return Err(ExchangeError::Semantic {
                venue: VENUE.to_string(),
                message,
            });
        }
        Ok(reply)
    }

    fn sign_action(&self, action: &Value, nonce: i64) -> Result<Value, ExchangeError> {
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

        // connectionId commits to the exact action bytes and nonce
        let mut connection_data = action.to_string().into_bytes();
        connection_data.extend_from_slice(&(nonce as u64).to_be_bytes());
        let connection_id = keccak256(&connection_data);

        let domain_separator = compute_domain_separator(SIGNING_CHAIN_ID);
        let struct_hash = agent_struct_hash(self.agent_source, &connection_id);
        let signing_hash = compute_signing_hash(&domain_separator, &struct_hash);

        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&signing_hash)
            .map_err(|e| ExchangeError::Auth {
                venue: VENUE.to_string(),
                message: format!("signing failed: {}", e),
            })?;

        Ok(json!({
            "r": format!("0x{}", hex::encode(signature.r().to_bytes())),
            "s": format!("0x{}", hex::encode(signature.s().to_bytes())),
            "v": recovery_id.to_byte() + 27,
        }))
    }

    async fn invalidate_caches(&self) {
        self.balance_cache.invalidate().await;
        self.positions_cache.invalidate().await;
    }

    // ------------------------------------------------------------------
    // Metadata and rounding
    // ------------------------------------------------------------------

    async fn coin_meta(&self, coin: &str) -> Result<CoinMeta, ExchangeError> {
        if let Some(meta) = self.meta_cache.read().await.get(coin) {
            return Ok(*meta);
        }

        let reply = self.info(json!({"type": "meta"})).await?;
        let universe = reply
            .get("universe")
            .and_then(|u| u.as_array())
            .cloned()
            .unwrap_or_default();

        let mut cache = self.meta_cache.write().await;
        for (index, entry) in universe.iter().enumerate() {
            let name = entry.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let size_decimals = entry
                .get("szDecimals")
                .and_then(|d| d.as_u64())
                .unwrap_or(3) as u32;
            cache.insert(
                name.to_string(),
                CoinMeta {
                    asset_index: index as u32,
                    size_decimals,
                },
            );
        }
        cache
            .get(coin)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                venue: VENUE.to_string(),
                symbol: coin.to_string(),
            })
    }

    fn round_decimals(value: f64, decimals: u32) -> f64 {
        let factor = 10f64.powi(decimals as i32);
        (value * factor).floor() / factor
    }

    fn round_size(meta: CoinMeta, size: f64) -> f64 {
        Self::round_decimals(size, meta.size_decimals)
    }

    fn round_px(meta: CoinMeta, price: f64) -> f64 {
        // Perp prices carry at most 6 significant decimals minus size decimals
        let decimals = 6u32.saturating_sub(meta.size_decimals);
        Self::round_decimals(price, decimals)
    }

    async fn mids(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        let reply = self.info(json!({"type": "allMids"})).await?;
        let map = reply.as_object().cloned().unwrap_or_default();
        Ok(map
            .into_iter()
            .filter_map(|(coin, px)| px.as_str().and_then(|s| s.parse().ok()).map(|p| (coin, p)))
            .collect())
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    async fn submit_market_order(
        &self,
        symbol: &str,
        is_buy: bool,
        size: f64,
        reduce_only: bool,
    ) -> Result<OrderAck, ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        let meta = self.coin_meta(coin).await?;
        let mid = self
            .mids()
            .await?
            .get(coin)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                venue: VENUE.to_string(),
                symbol: symbol.to_string(),
            })?;

        // Market orders are aggressive IoC limits with 5% slippage headroom
        let limit_px = if is_buy { mid * 1.05 } else { mid * 0.95 };
        let action = json!({
            "type": "order",
            "orders": [{
                "a": meta.asset_index,
                "b": is_buy,
                "p": format!("{}", Self::round_px(meta, limit_px)),
                "s": format!("{}", Self::round_size(meta, size)),
                "r": reduce_only,
                "t": {"limit": {"tif": "Ioc"}},
            }],
            "grouping": "na",
        });
        let reply = self.post_signed_action(action).await?;
        Ok(OrderAck {
            order_id: extract_oid(&reply),
            symbol: symbol.to_string(),
            status: "FILLED".to_string(),
        })
    }

    async fn submit_trigger_order(
        &self,
        symbol: &str,
        position_side: Side,
        size: f64,
        trigger_px: f64,
        tpsl: &str,
    ) -> Result<(), ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        let meta = self.coin_meta(coin).await?;
        // Closing a long sells; closing a short buys
        let is_buy = position_side == Side::Short;
        let px = Self::round_px(meta, trigger_px);
        let action = json!({
            "type": "order",
            "orders": [{
                "a": meta.asset_index,
                "b": is_buy,
                "p": format!("{}", px),
                "s": format!("{}", Self::round_size(meta, size)),
                "r": true,
                "t": {"trigger": {"isMarket": true, "triggerPx": format!("{}", px), "tpsl": tpsl}},
            }],
            "grouping": "na",
        });
        self.post_signed_action(action).await?;
        Ok(())
    }

    async fn open_trigger_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<(i64, OrderType)>, ExchangeError> {
        let orders = self.get_open_orders(symbol).await?;
        Ok(orders
            .into_iter()
            .filter(|o| {
                o.order_type == OrderType::StopMarket || o.order_type == OrderType::TakeProfitMarket
            })
            .map(|o| (o.order_id, o.order_type))
            .collect())
    }

    async fn cancel_order_ids(&self, symbol: &str, oids: Vec<i64>) -> Result<(), ExchangeError> {
        if oids.is_empty() {
            return Ok(());
        }
        let coin = Self::coin_for_symbol(symbol);
        let meta = self.coin_meta(coin).await?;
        let cancels: Vec<Value> = oids
            .iter()
            .map(|oid| json!({"a": meta.asset_index, "o": oid}))
            .collect();
        self.post_signed_action(json!({"type": "cancel", "cancels": cancels}))
            .await?;
        Ok(())
    }

    async fn update_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        is_cross: bool,
    ) -> Result<(), ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        let meta = self.coin_meta(coin).await?;
        self.post_signed_action(json!({
            "type": "updateLeverage",
            "asset": meta.asset_index,
            "isCross": is_cross,
            "leverage": leverage,
        }))
        .await?;
        self.margin_state
            .write()
            .await
            .insert(coin.to_string(), (leverage, is_cross));
        Ok(())
    }

    async fn margin_state_for(&self, coin: &str) -> (u32, bool) {
        self.margin_state
            .read()
            .await
            .get(coin)
            .copied()
            .unwrap_or((3, true))
    }
}

// =============================================================================
// EIP-712 HASHING
// =============================================================================

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

fn keccak256_str(s: &str) -> [u8; 32] {
    keccak256(s.as_bytes())
}

fn domain_type_hash() -> [u8; 32] {
    keccak256_str(
        "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    )
}

/// Type hash for the venue's phantom-agent struct
fn agent_type_hash() -> [u8; 32] {
    keccak256_str("Agent(string source,bytes32 connectionId)")
}

/// Left-pad a u64 into a 32-byte ABI word
fn abi_encode_u256_from_u64(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// `hash(domainTypeHash || hash(name) || hash(version) || chainId || verifyingContract)`
/// The agent domain uses the zero verifying contract.
fn compute_domain_separator(chain_id: u64) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&domain_type_hash());
    encoded.extend_from_slice(&keccak256_str(DOMAIN_NAME));
    encoded.extend_from_slice(&keccak256_str(DOMAIN_VERSION));
    encoded.extend_from_slice(&abi_encode_u256_from_u64(chain_id));
    encoded.extend_from_slice(&[0u8; 32]);
    keccak256(&encoded)
}

/// `hash(agentTypeHash || hash(source) || connectionId)`
fn agent_struct_hash(source: &str, connection_id: &[u8; 32]) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(3 * 32);
    encoded.extend_from_slice(&agent_type_hash());
    encoded.extend_from_slice(&keccak256_str(source));
    encoded.extend_from_slice(connection_id);
    keccak256(&encoded)
}

/// `keccak256("\x19\x01" || domainSeparator || structHash)`
fn compute_signing_hash(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut data = Vec::with_capacity(2 + 32 + 32);
    data.push(0x19);
    data.push(0x01);
    data.extend_from_slice(domain_separator);
    data.extend_from_slice(struct_hash);
    keccak256(&data)
}

fn extract_oid(reply: &Value) -> i64 {
    reply
        .pointer("/response/data/statuses/0/filled/oid")
        .or_else(|| reply.pointer("/response/data/statuses/0/resting/oid"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

#[async_trait]
impl Exchange for HyperliquidDex {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn get_balance(&self) -> Result<AccountBalance, ExchangeError> {
        if let Some(cached) = self.balance_cache.get().await {
            return Ok(cached);
        }
        let reply = self
            .info(json!({"type": "clearinghouseState", "user": self.wallet_addr}))
            .await?;

        let account_value = reply
            .pointer("/marginSummary/accountValue")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let withdrawable = reply
            .get("withdrawable")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        let unrealized: f64 = reply
            .get("assetPositions")
            .and_then(|a| a.as_array())
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        row.pointer("/position/unrealizedPnl")
                            .and_then(|v| v.as_str())
                            .and_then(|s| s.parse::<f64>().ok())
                    })
                    .sum()
            })
            .unwrap_or(0.0);

        let balance = AccountBalance {
            wallet_balance: account_value - unrealized,
            unrealized_profit: unrealized,
            available_balance: withdrawable,
        };
        self.balance_cache.put(balance).await;
        Ok(balance)
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        if let Some(cached) = self.positions_cache.get().await {
            return Ok(cached);
        }
        let reply = self
            .info(json!({"type": "clearinghouseState", "user": self.wallet_addr}))
            .await?;
        let mids = self.mids().await.unwrap_or_default();

        let mut positions = Vec::new();
        for row in reply
            .get("assetPositions")
            .and_then(|a| a.as_array())
            .cloned()
            .unwrap_or_default()
        {
            let p = match row.get("position") {
                Some(p) => p.clone(),
                None => continue,
            };
            let coin = p.get("coin").and_then(|c| c.as_str()).unwrap_or("");
            let szi = p
                .get("szi")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            if szi == 0.0 {
                continue;
            }
            let pnum = |key: &str| -> f64 {
                p.get(key)
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            positions.push(ExchangePosition {
                symbol: format!("{}USDT", coin),
                side: if szi > 0.0 { Side::Long } else { Side::Short },
                entry_price: pnum("entryPx"),
                mark_price: mids.get(coin).copied().unwrap_or_else(|| pnum("entryPx")),
                position_amt: szi,
                unrealized_profit: pnum("unrealizedPnl"),
                liquidation_price: pnum("liquidationPx"),
                leverage: p
                    .pointer("/leverage/value")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(3) as u32,
            });
        }
        self.positions_cache.put(positions.clone()).await;
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let reply = self
            .info(json!({"type": "frontendOpenOrders", "user": self.wallet_addr}))
            .await?;
        let coin_filter = if symbol.is_empty() {
            None
        } else {
            Some(Self::coin_for_symbol(symbol))
        };

        let mut orders = Vec::new();
        for row in reply.as_array().cloned().unwrap_or_default() {
            let coin = row.get("coin").and_then(|c| c.as_str()).unwrap_or("");
            if let Some(filter) = coin_filter {
                if coin != filter {
                    continue;
                }
            }
            let order_type_str = row
                .get("orderType")
                .and_then(|t| t.as_str())
                .unwrap_or("Limit");
            let order_type = if order_type_str.contains("Stop") {
                OrderType::StopMarket
            } else if order_type_str.contains("Take") {
                OrderType::TakeProfitMarket
            } else {
                OrderType::Limit
            };
            let num = |key: &str| -> f64 {
                row.get(key)
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            let is_buy = row.get("side").and_then(|s| s.as_str()) == Some("B");
            orders.push(OpenOrder {
                symbol: format!("{}USDT", coin),
                order_id: row.get("oid").and_then(|v| v.as_i64()).unwrap_or(0),
                order_type,
                side: if is_buy { "BUY" } else { "SELL" }.to_string(),
                // Reduce-only triggers protect the opposite-direction position
                position_side: if is_buy { "SHORT" } else { "LONG" }.to_string(),
                quantity: num("sz"),
                price: num("limitPx"),
                stop_price: num("triggerPx"),
            });
        }
        Ok(orders)
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        self.mids()
            .await?
            .get(coin)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                venue: VENUE.to_string(),
                symbol: symbol.to_string(),
            })
    }

    async fn open_long(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        let (_, is_cross) = self.margin_state_for(coin).await;
        self.update_leverage(symbol, leverage, is_cross).await?;
        let result = self.submit_market_order(symbol, true, quantity, false).await;
        self.invalidate_caches().await;
        result
    }

    async fn open_short(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        let (_, is_cross) = self.margin_state_for(coin).await;
        self.update_leverage(symbol, leverage, is_cross).await?;
        let result = self
            .submit_market_order(symbol, false, quantity, false)
            .await;
        self.invalidate_caches().await;
        result
    }

    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExchangeError> {
        let result = async {
            let qty = if quantity > 0.0 {
                quantity
            } else {
                self.get_positions()
                    .await?
                    .iter()
                    .find(|p| p.symbol == symbol && p.side == Side::Long)
                    .map(|p| p.quantity())
                    .ok_or_else(|| ExchangeError::Semantic {
                        venue: VENUE.to_string(),
                        message: format!("no open position for {} long", symbol),
                    })?
            };
            self.submit_market_order(symbol, false, qty, true).await
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
                self.get_positions()
                    .await?
                    .iter()
                    .find(|p| p.symbol == symbol && p.side == Side::Short)
                    .map(|p| p.quantity())
                    .ok_or_else(|| ExchangeError::Semantic {
                        venue: VENUE.to_string(),
                        message: format!("no open position for {} short", symbol),
                    })?
            };
            self.submit_market_order(symbol, true, qty, true).await
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
            .submit_trigger_order(symbol, position_side, quantity, price, "sl")
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
            .submit_trigger_order(symbol, position_side, quantity, price, "tp")
            .await;
        self.invalidate_caches().await;
        result
    }

    async fn cancel_stop_loss_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let result = cancel_with_retry("cancel stop-loss orders", || async move {
            let oids: Vec<i64> = self
                .open_trigger_orders(symbol)
                .await?
                .into_iter()
                .filter(|(_, t)| *t == OrderType::StopMarket)
                .map(|(oid, _)| oid)
                .collect();
            self.cancel_order_ids(symbol, oids).await
        })
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn cancel_take_profit_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let result = cancel_with_retry("cancel take-profit orders", || async move {
            let oids: Vec<i64> = self
                .open_trigger_orders(symbol)
                .await?
                .into_iter()
                .filter(|(_, t)| *t == OrderType::TakeProfitMarket)
                .map(|(oid, _)| oid)
                .collect();
            self.cancel_order_ids(symbol, oids).await
        })
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let result = cancel_with_retry("cancel all orders", || async move {
            let oids: Vec<i64> = self
                .get_open_orders(symbol)
                .await?
                .into_iter()
                .map(|o| o.order_id)
                .collect();
            self.cancel_order_ids(symbol, oids).await
        })
        .await;
        self.invalidate_caches().await;
        result
    }

    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> Result<(), ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        let (leverage, current_cross) = self.margin_state_for(coin).await;
        if current_cross == is_cross {
            return Ok(());
        }
        self.update_leverage(symbol, leverage, is_cross).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let coin = Self::coin_for_symbol(symbol);
        let (_, is_cross) = self.margin_state_for(coin).await;
        self.update_leverage(symbol, leverage, is_cross).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_to_coin() {
        assert_eq!(HyperliquidDex::coin_for_symbol("BTCUSDT"), "BTC");
        assert_eq!(HyperliquidDex::coin_for_symbol("SOL"), "SOL");
    }

    #[test]
    fn test_rounding_conventions() {
        let meta = CoinMeta {
            asset_index: 0,
            size_decimals: 3,
        };
        assert_eq!(HyperliquidDex::round_size(meta, 0.123456), 0.123);
        // price decimals = 6 - szDecimals = 3
        assert_eq!(HyperliquidDex::round_px(meta, 42.123987), 42.123);
    }

    fn test_dex(testnet: bool) -> HyperliquidDex {
        HyperliquidDex::new(
            // throwaway test vector key
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318".to_string(),
            "0x1234".to_string(),
            testnet,
        )
    }

    #[test]
    fn test_sign_action_shape() {
        let sig = test_dex(true)
            .sign_action(&json!({"type": "cancel"}), 1_700_000_000_000)
            .unwrap();
        let r = sig.get("r").unwrap().as_str().unwrap();
        let v = sig.get("v").unwrap().as_u64().unwrap();
        assert!(r.starts_with("0x") && r.len() == 66);
        assert!(v == 27 || v == 28);
    }

    #[test]
    fn test_sign_action_rejects_bad_key() {
        let dex = HyperliquidDex::new("not-hex".to_string(), "0x1234".to_string(), true);
        assert!(dex.sign_action(&json!({}), 0).is_err());
    }

    #[test]
    fn test_domain_separator_construction() {
        // hash(domainTypeHash || hash(name) || hash(version) || chainId || zeroContract)
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&keccak256_str(
            "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        ));
        encoded.extend_from_slice(&keccak256_str(DOMAIN_NAME));
        encoded.extend_from_slice(&keccak256_str(DOMAIN_VERSION));
        encoded.extend_from_slice(&abi_encode_u256_from_u64(SIGNING_CHAIN_ID));
        encoded.extend_from_slice(&[0u8; 32]);
        assert_eq!(compute_domain_separator(SIGNING_CHAIN_ID), keccak256(&encoded));

        // chainId is part of the domain
        assert_ne!(
            compute_domain_separator(SIGNING_CHAIN_ID),
            compute_domain_separator(42_161)
        );
    }

    #[test]
    fn test_agent_struct_hash_binds_source_and_connection() {
        let connection_a = keccak256(b"action-a");
        let connection_b = keccak256(b"action-b");
        assert_ne!(
            agent_struct_hash(AGENT_SOURCE_MAINNET, &connection_a),
            agent_struct_hash(AGENT_SOURCE_TESTNET, &connection_a)
        );
        assert_ne!(
            agent_struct_hash(AGENT_SOURCE_MAINNET, &connection_a),
            agent_struct_hash(AGENT_SOURCE_MAINNET, &connection_b)
        );
    }

    #[test]
    fn test_signing_hash_uses_eip712_prefix() {
        let domain = compute_domain_separator(SIGNING_CHAIN_ID);
        let struct_hash = agent_struct_hash(AGENT_SOURCE_MAINNET, &keccak256(b"conn"));

        let mut prefixed = vec![0x19, 0x01];
        prefixed.extend_from_slice(&domain);
        prefixed.extend_from_slice(&struct_hash);
        assert_eq!(compute_signing_hash(&domain, &struct_hash), keccak256(&prefixed));

        // The "\x19\x01" prefix is load-bearing
        let mut unprefixed = Vec::new();
        unprefixed.extend_from_slice(&domain);
        unprefixed.extend_from_slice(&struct_hash);
        assert_ne!(compute_signing_hash(&domain, &struct_hash), keccak256(&unprefixed));
    }

    #[test]
    fn test_signature_depends_on_nonce_and_network() {
        let action = json!({"type": "cancel"});
        let dex = test_dex(false);
        // Different nonce -> different connectionId -> different signature
        let sig_a = dex.sign_action(&action, 1).unwrap();
        let sig_b = dex.sign_action(&action, 2).unwrap();
        assert_ne!(sig_a.get("r"), sig_b.get("r"));

        // Same action and nonce signed under the testnet agent source differs
        let sig_testnet = test_dex(true).sign_action(&action, 1).unwrap();
        assert_ne!(sig_a.get("r"), sig_testnet.get("r"));

        // Deterministic (RFC 6979) for identical inputs
        assert_eq!(sig_a, dex.sign_action(&action, 1).unwrap());
    }

    #[test]
    fn test_extract_oid() {
        let reply = json!({"response": {"data": {"statuses": [{"filled": {"oid": 77}}]}}});
        assert_eq!(extract_oid(&reply), 77);
        let resting = json!({"response": {"data": {"statuses": [{"resting": {"oid": 88}}]}}});
        assert_eq!(extract_oid(&resting), 88);
        assert_eq!(extract_oid(&json!({})), 0);
    }
}
