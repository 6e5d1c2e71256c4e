//! Deribit JSON-RPC request builder.
//!
//! Turns `Deribit <id> <verb> [args...]` lines into JSON-RPC 2.0 payloads.
//! The dispatcher only sees the [`RequestBuilder`] trait.

use serde_json::{Value, json};

/// An outgoing payload plus whether answering it opens a push stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltRequest {
    pub payload: String,
    pub streaming: bool,
}

pub trait RequestBuilder {
    /// `None` means the text is not a dispatchable request.
    fn build_request(&mut self, command_text: &str) -> Option<BuiltRequest>;
}

/// Verbs understood by [`DeribitApi`], for help output
pub const VERBS: &[(&str, &str)] = &[
    ("auth <client_id> <client_secret>", "authenticate with client credentials"),
    ("buy <instrument> <amount> [price]", "market order, or limit when a price is given"),
    ("sell <instrument> <amount> [price]", "market order, or limit when a price is given"),
    ("cancel <order_id>", "cancel one order"),
    ("cancel_all", "cancel every open order"),
    ("modify <order_id> <amount> <price>", "edit an open order"),
    ("orderbook <instrument> [depth]", "order book snapshot (depth 5 by default)"),
    ("positions [currency] [kind]", "open positions (BTC future by default)"),
    ("open_orders [currency]", "open orders (BTC by default)"),
    ("subscribe <channel>...", "subscribe and stream until 'q'"),
    ("unsubscribe <channel>...", "drop channel subscriptions"),
    ("time", "server time"),
    ("test", "connectivity check"),
];

#[derive(Debug)]
pub struct DeribitApi {
    next_request_id: u64,
}

impl DeribitApi {
    pub fn new() -> Self {
        Self { next_request_id: 1 }
    }

    fn envelope(&mut self, method: &str, params: Value, streaming: bool) -> BuiltRequest {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        BuiltRequest {
            payload: payload.to_string(),
            streaming,
        }
    }
}

impl Default for DeribitApi {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder for DeribitApi {
    fn build_request(&mut self, command_text: &str) -> Option<BuiltRequest> {
        let mut words = command_text.split_whitespace();
        if words.next()? != "Deribit" {
            return None;
        }
        words.next()?.parse::<u64>().ok()?;
        let verb = words.next()?;
        let args: Vec<&str> = words.collect();

        let (method, params, streaming) = match (verb, args.as_slice()) {
            ("auth", [client_id, client_secret]) => (
                "public/auth",
                json!({
                    "grant_type": "client_credentials",
                    "client_id": client_id,
                    "client_secret": client_secret,
                }),
                false,
            ),
            ("buy", [instrument, amount, price @ ..]) => {
                ("private/buy", order_params(instrument, amount, price)?, false)
            }
            ("sell", [instrument, amount, price @ ..]) => {
                ("private/sell", order_params(instrument, amount, price)?, false)
            }
            ("cancel", [order_id]) => ("private/cancel", json!({ "order_id": order_id }), false),
            ("cancel_all", []) => ("private/cancel_all", json!({}), false),
            ("modify", [order_id, amount, price]) => (
                "private/edit",
                json!({
                    "order_id": order_id,
                    "amount": number(amount)?,
                    "price": number(price)?,
                }),
                false,
            ),
            ("orderbook", [instrument, depth @ ..]) => {
                let depth = match depth {
                    [] => 5,
                    [depth] => depth.parse::<u32>().ok()?,
                    _ => return None,
                };
                (
                    "public/get_order_book",
                    json!({ "instrument_name": instrument, "depth": depth }),
                    false,
                )
            }
            ("positions", rest) if rest.len() <= 2 => (
                "private/get_positions",
                json!({
                    "currency": rest.first().copied().unwrap_or("BTC"),
                    "kind": rest.get(1).copied().unwrap_or("future"),
                }),
                false,
            ),
            ("open_orders", rest) if rest.len() <= 1 => (
                "private/get_open_orders_by_currency",
                json!({ "currency": rest.first().copied().unwrap_or("BTC") }),
                false,
            ),
            ("subscribe", channels) if !channels.is_empty() => {
                ("public/subscribe", json!({ "channels": channels }), true)
            }
            ("unsubscribe", channels) if !channels.is_empty() => {
                ("public/unsubscribe", json!({ "channels": channels }), false)
            }
            ("time", []) => ("public/get_time", json!({}), false),
            ("test", []) => ("public/test", json!({}), false),
            _ => return None,
        };

        Some(self.envelope(method, params, streaming))
    }
}

fn order_params(instrument: &str, amount: &str, price: &[&str]) -> Option<Value> {
    let amount = number(amount)?;
    match price {
        [] => Some(json!({
            "instrument_name": instrument,
            "amount": amount,
            "type": "market",
        })),
        [price] => Some(json!({
            "instrument_name": instrument,
            "amount": amount,
            "type": "limit",
            "price": number(price)?,
        })),
        _ => None,
    }
}

fn number(word: &str) -> Option<f64> {
    word.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(api: &mut DeribitApi, text: &str) -> Option<(Value, bool)> {
        api.build_request(text).map(|req| {
            let value: Value = serde_json::from_str(&req.payload).unwrap();
            (value, req.streaming)
        })
    }

    #[test]
    fn envelope_is_json_rpc_with_increasing_ids() {
        let mut api = DeribitApi::new();
        let (first, _) = build(&mut api, "Deribit 0 time").unwrap();
        let (second, _) = build(&mut api, "Deribit 0 test").unwrap();

        assert_eq!(first["jsonrpc"], "2.0");
        assert_eq!(first["method"], "public/get_time");
        assert_eq!(first["id"], 1);
        assert_eq!(second["method"], "public/test");
        assert_eq!(second["id"], 2);
    }

    #[test]
    fn auth_uses_client_credentials() {
        let mut api = DeribitApi::new();
        let (req, streaming) = build(&mut api, "Deribit 0 auth my-id my-secret").unwrap();
        assert!(!streaming);
        assert_eq!(req["method"], "public/auth");
        assert_eq!(req["params"]["grant_type"], "client_credentials");
        assert_eq!(req["params"]["client_id"], "my-id");
        assert_eq!(req["params"]["client_secret"], "my-secret");
    }

    #[test]
    fn orders_are_market_unless_priced() {
        let mut api = DeribitApi::new();
        let (market, _) = build(&mut api, "Deribit 0 buy BTC-PERPETUAL 10").unwrap();
        assert_eq!(market["method"], "private/buy");
        assert_eq!(market["params"]["type"], "market");
        assert_eq!(market["params"]["amount"], 10.0);
        assert!(market["params"].get("price").is_none());

        let (limit, _) = build(&mut api, "Deribit 0 sell ETH-PERPETUAL 1.5 3200.25").unwrap();
        assert_eq!(limit["method"], "private/sell");
        assert_eq!(limit["params"]["type"], "limit");
        assert_eq!(limit["params"]["price"], 3200.25);
    }

    #[test]
    fn defaults_for_optional_arguments() {
        let mut api = DeribitApi::new();
        let (book, _) = build(&mut api, "Deribit 0 orderbook BTC-PERPETUAL").unwrap();
        assert_eq!(book["params"]["depth"], 5);
        let (book, _) = build(&mut api, "Deribit 0 orderbook BTC-PERPETUAL 20").unwrap();
        assert_eq!(book["params"]["depth"], 20);

        let (positions, _) = build(&mut api, "Deribit 0 positions").unwrap();
        assert_eq!(positions["params"]["currency"], "BTC");
        assert_eq!(positions["params"]["kind"], "future");

        let (orders, _) = build(&mut api, "Deribit 0 open_orders ETH").unwrap();
        assert_eq!(orders["method"], "private/get_open_orders_by_currency");
        assert_eq!(orders["params"]["currency"], "ETH");
    }

    #[test]
    fn order_management() {
        let mut api = DeribitApi::new();
        let (cancel, _) = build(&mut api, "Deribit 0 cancel ETH-123").unwrap();
        assert_eq!(cancel["params"]["order_id"], "ETH-123");

        let (edit, _) = build(&mut api, "Deribit 0 modify ETH-123 2 3100").unwrap();
        assert_eq!(edit["method"], "private/edit");
        assert_eq!(edit["params"]["amount"], 2.0);

        let (all, _) = build(&mut api, "Deribit 0 cancel_all").unwrap();
        assert_eq!(all["method"], "private/cancel_all");
    }

    #[test]
    fn only_subscribe_streams() {
        let mut api = DeribitApi::new();
        let (sub, streaming) =
            build(&mut api, "Deribit 0 subscribe book.BTC-PERPETUAL.100ms ticker.BTC-PERPETUAL.raw")
                .unwrap();
        assert!(streaming);
        assert_eq!(sub["method"], "public/subscribe");
        assert_eq!(
            sub["params"]["channels"],
            json!(["book.BTC-PERPETUAL.100ms", "ticker.BTC-PERPETUAL.raw"])
        );

        let (_, streaming) = build(&mut api, "Deribit 0 unsubscribe book.BTC-PERPETUAL.100ms").unwrap();
        assert!(!streaming);
    }

    #[test]
    fn rejects_what_it_cannot_build() {
        let mut api = DeribitApi::new();
        for text in [
            "Deribit 0 fly",
            "Deribit 0",
            "Deribit x time",
            "deribit 0 time",
            "Deribit 0 buy BTC-PERPETUAL lots",
            "Deribit 0 buy BTC-PERPETUAL 1 2 3",
            "Deribit 0 orderbook",
            "Deribit 0 orderbook BTC-PERPETUAL deep",
            "Deribit 0 subscribe",
            "Deribit 0 time now",
        ] {
            assert!(api.build_request(text).is_none(), "{text}");
        }
        // Rejections do not consume request ids
        let (req, _) = build(&mut api, "Deribit 0 time").unwrap();
        assert_eq!(req["id"], 1);
    }
}
