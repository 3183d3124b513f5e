//! Signed REST client.
//!
//! Reads carry their parameters in the query string, mutations send a
//! form-encoded body. The exact path+query and body strings that are signed
//! are the ones put on the wire.

use std::future::Future;
use std::time::Duration;

use clotho_core::{
    ClientOrderId, CurrencyPair, LimitOrder, OrderClass, OrderPlacementParams, OrderSide,
    PositionSnapshot, Price, Size, Ticker, WalletBalance,
};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::{BoxFuture, ExchangeApi, OpenOrder, OrderRef};
use crate::error::{ApiError, ApiResult};
use crate::signer::Credentials;
use crate::wire::{
    encode_pairs, ErrorBody, OrderForm, PlacedOrderResponse, RawBookLevel, RawInstrument,
    RawMargin, RawOrder, RawPosition,
};

/// Path prefix of every REST endpoint.
pub const API_PREFIX: &str = "/api/v1";

/// Fixed page size of the open-order listing.
pub const ORDER_PAGE_SIZE: usize = 500;

/// Upper bound on pages fetched in one listing.
const MAX_PAGES: usize = 100;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const OPEN_ORDERS_FILTER: &str = r#"{"open": true}"#;
const OPEN_POSITIONS_FILTER: &str = r#"{"isOpen":true}"#;

type Params = Vec<(&'static str, String)>;

/// REST client bound to one host and one API key.
pub struct RestClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl RestClient {
    /// # Arguments
    /// * `base_url` - scheme and host, e.g. `https://testnet.bitmex.com`
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: Params,
        form: Params,
    ) -> ApiResult<T> {
        let mut path = format!("{API_PREFIX}/{endpoint}");
        if !query.is_empty() {
            path.push('?');
            path.push_str(&encode_pairs(&query));
        }
        let body = encode_pairs(&form);
        let signed = self.credentials.sign_request(method.as_str(), &path, &body);

        debug!(%method, %path, nonce = signed.expires, "REST request");

        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("api-key", signed.api_key)
            .header("api-expires", signed.expires.to_string())
            .header("api-signature", signed.signature);
        if !body.is_empty() {
            builder = builder
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let err = ErrorBody::into_api_error(status.as_u16(), &text);
            warn!(endpoint, error = %err, "REST request rejected");
            return Err(err);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> ApiResult<Vec<OpenOrder>> {
        let raw = collect_pages(ORDER_PAGE_SIZE, |start| {
            let mut query: Params = Vec::new();
            if let Some(symbol) = symbol {
                query.push(("symbol", symbol.to_string()));
            }
            query.push(("filter", OPEN_ORDERS_FILTER.to_string()));
            query.push(("count", ORDER_PAGE_SIZE.to_string()));
            query.push(("start", start.to_string()));
            query.push(("reverse", "true".to_string()));
            self.request::<Vec<RawOrder>>(Method::GET, "order", query, Vec::new())
        })
        .await?;

        Ok(raw.into_iter().filter_map(open_order_from_raw).collect())
    }

    async fn fetch_order_book(
        &self,
        pair: &CurrencyPair,
        side: OrderSide,
    ) -> ApiResult<Vec<LimitOrder>> {
        let levels: Vec<RawBookLevel> = self
            .request(
                Method::GET,
                "orderBook/L2",
                vec![("symbol", pair.symbol())],
                Vec::new(),
            )
            .await?;

        let mut book: Vec<LimitOrder> = levels
            .into_iter()
            .filter(|l| l.side() == side)
            .map(|l| LimitOrder::new(side, Size::new(l.size), pair.clone(), Price::new(l.price)))
            .collect();
        book.sort_by(LimitOrder::book_cmp);
        Ok(book)
    }

    async fn submit_order(
        &self,
        order: LimitOrder,
        class: OrderClass,
        params: OrderPlacementParams,
    ) -> ApiResult<String> {
        let cl_ord_id = ClientOrderId::new();
        let form = OrderForm::derive(&order, class, &params, &cl_ord_id);
        let response: PlacedOrderResponse = self
            .request(Method::POST, "order", Vec::new(), form.fields())
            .await?;
        response
            .order_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Protocol("order response without orderID".to_string()))
    }
}

fn open_order_from_raw(raw: RawOrder) -> Option<OpenOrder> {
    Some(OpenOrder {
        order_id: raw.order_id?,
        cl_ord_id: raw.cl_ord_id.filter(|c| !c.is_empty()),
        symbol: raw.symbol.unwrap_or_default(),
        side: raw.side.as_deref().and_then(|s| OrderSide::from_wire(s).ok()),
        price: raw.price.map(Price::new),
    })
}

/// Fetches pages starting at offsets `0, page_size, 2*page_size, ...` until a
/// page shorter than `page_size` arrives.
pub async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch: F) -> ApiResult<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = ApiResult<Vec<T>>>,
{
    let mut all = Vec::new();
    for page in 0..MAX_PAGES {
        let batch = fetch(page * page_size).await?;
        let len = batch.len();
        all.extend(batch);
        if len < page_size {
            return Ok(all);
        }
    }
    warn!(pages = MAX_PAGES, "page limit reached while listing");
    Ok(all)
}

impl ExchangeApi for RestClient {
    fn get_wallet_balance(&self) -> BoxFuture<'_, ApiResult<WalletBalance>> {
        Box::pin(async move {
            let margin: RawMargin = self
                .request(Method::GET, "user/margin", Vec::new(), Vec::new())
                .await?;
            Ok(margin.into())
        })
    }

    fn get_ticker<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<Ticker>> {
        Box::pin(async move {
            let instruments: Vec<RawInstrument> = self
                .request(
                    Method::GET,
                    "instrument",
                    vec![("symbol", symbol.to_string())],
                    Vec::new(),
                )
                .await?;
            instruments
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::Protocol(format!("unknown instrument {symbol}")))?
                .into_ticker()
        })
    }

    fn get_order_book<'a>(
        &'a self,
        pair: &'a CurrencyPair,
        side: OrderSide,
    ) -> BoxFuture<'a, ApiResult<Vec<LimitOrder>>> {
        Box::pin(self.fetch_order_book(pair, side))
    }

    fn get_open_orders<'a>(
        &'a self,
        symbol: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<Vec<OpenOrder>>> {
        Box::pin(self.fetch_open_orders(symbol))
    }

    fn place_order(
        &self,
        order: LimitOrder,
        class: OrderClass,
        params: OrderPlacementParams,
    ) -> BoxFuture<'_, ApiResult<String>> {
        Box::pin(self.submit_order(order, class, params))
    }

    fn cancel_order(&self, target: OrderRef) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let form = match target {
                OrderRef::Id(id) => vec![("orderID", id)],
                OrderRef::ClientId(cid) => vec![("clOrdID", cid)],
            };
            let _: Vec<RawOrder> = self
                .request(Method::DELETE, "order", Vec::new(), form)
                .await?;
            Ok(())
        })
    }

    fn cancel_all_orders<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<usize>> {
        Box::pin(async move {
            let cancelled: Vec<RawOrder> = self
                .request(
                    Method::DELETE,
                    "order/all",
                    Vec::new(),
                    vec![("symbol", symbol.to_string())],
                )
                .await?;
            Ok(cancelled.len())
        })
    }

    fn get_open_positions(&self) -> BoxFuture<'_, ApiResult<Vec<PositionSnapshot>>> {
        Box::pin(async move {
            let positions: Vec<RawPosition> = self
                .request(
                    Method::GET,
                    "position",
                    vec![("filter", OPEN_POSITIONS_FILTER.to_string())],
                    Vec::new(),
                )
                .await?;
            Ok(positions
                .into_iter()
                .filter_map(RawPosition::into_snapshot)
                .filter(|p| !p.is_flat())
                .collect())
        })
    }

    fn close_position<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let _: serde_json::Value = self
                .request(
                    Method::POST,
                    "order/closePosition",
                    Vec::new(),
                    vec![("symbol", symbol.to_string())],
                )
                .await?;
            Ok(())
        })
    }
}
