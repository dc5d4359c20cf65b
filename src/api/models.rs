use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::draws::WinnerInput;
use crate::error::{AppError, AppResult};
use crate::store::models::{
    Draw, DrawQuery, EarningsPayment, Payout, PaymentQuery, PaymentSortField, PayoutData, PayoutStatus,
    SortDirection, TxData,
};

const DEFAULT_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 100;

// ========== REQUEST MODELS ==========

/// Raw query string pairs; repeated keys are kept in order
pub type QueryPairs = Vec<(String, String)>;

const WINNERS: &str = "draw.winners";

/// Body of `POST /api/draws`: `{draw: {winners: [{hash, recipient}]}}`
#[derive(Debug)]
pub struct CreateDrawRequest {
    pub winners: Vec<WinnerInput>,
}

impl CreateDrawRequest {
    /// Shape checks on the raw body. Field formats are left to the draw
    /// constructor so every winner error is reported the same way.
    pub fn from_value(body: &Value) -> AppResult<Self> {
        let items = body
            .pointer("/draw/winners")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::validation(WINNERS, "must be an array"))?;

        let mut winners = Vec::with_capacity(items.len());
        for item in items {
            let fields = match item {
                Value::Array(_) => return Err(AppError::validation(WINNERS, "value must not be an array")),
                Value::Object(fields) => fields,
                _ => return Err(AppError::validation(WINNERS, "value must be an object")),
            };
            let text = |key: &str| fields.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            winners.push(WinnerInput {
                hash: text("hash"),
                recipient: text("recipient"),
            });
        }
        Ok(Self { winners })
    }
}

/// Pagination shared by list endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Paging {
    pub limit: u64,
    pub page: u64,
    pub skip: u64,
}

fn values<'a>(pairs: &'a [(String, String)], key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    pairs.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn first<'a>(pairs: &'a [(String, String)], key: &'a str) -> Option<&'a str> {
    values(pairs, key).next()
}

/// First value of a parameter as an integer; unparseable values count as absent
fn integer(pairs: &[(String, String)], key: &str) -> Option<i64> {
    first(pairs, key).and_then(|v| v.trim().parse::<i64>().ok())
}

impl Paging {
    /// `limit` is clamped to 1..=100 and `page` to at least 1. An explicit
    /// `skip` is honoured when `allow_skip` is set.
    pub fn from_pairs(pairs: &[(String, String)], allow_skip: bool) -> Self {
        let limit = integer(pairs, "limit")
            .map(|l| l.clamp(1, MAX_LIMIT as i64) as u64)
            .unwrap_or(DEFAULT_LIMIT);
        let page = integer(pairs, "page").map(|p| p.max(1) as u64).unwrap_or(1);
        let skip = allow_skip
            .then(|| integer(pairs, "skip"))
            .flatten()
            .filter(|s| *s > 0)
            .map(|s| s as u64)
            .unwrap_or_else(|| limit.saturating_mul(page - 1));
        Self { limit, page, skip }
    }
}

/// Parse `sort` values such as `-timestamp,hash`. Unknown fields are ignored.
pub fn parse_sorts<T>(pairs: &[(String, String)], parse: impl Fn(&str) -> Option<T>) -> Vec<(T, SortDirection)> {
    values(pairs, "sort")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter_map(|v| match v.strip_prefix('-') {
            Some(field) => parse(field).map(|f| (f, SortDirection::Desc)),
            None => parse(v).map(|f| (f, SortDirection::Asc)),
        })
        .collect()
}

pub fn payment_query(pairs: &[(String, String)], paging: &Paging) -> PaymentQuery {
    let owned = |key: &str| values(pairs, key).map(str::to_string).collect::<Vec<_>>();
    let mut query = PaymentQuery {
        recipients: owned("recipient"),
        senders: owned("sender"),
        hashes: owned("hash"),
        since: integer(pairs, "since"),
        until: integer(pairs, "until"),
        skip: paging.skip,
        limit: paging.limit,
        ..Default::default()
    };
    let sort = parse_sorts(pairs, PaymentSortField::parse);
    if !sort.is_empty() {
        query.sort = sort;
    }
    query
}

pub fn draw_query(pairs: &[(String, String)], paging: &Paging) -> DrawQuery {
    let direction = parse_sorts(pairs, |f| (f == "timestamp").then_some(()))
        .first()
        .map(|(_, d)| *d)
        .unwrap_or(SortDirection::Desc);
    DrawQuery {
        since: integer(pairs, "since"),
        until: integer(pairs, "until"),
        direction,
        skip: paging.skip,
        limit: paging.limit,
    }
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMetadata {
    pub count: usize,
    pub limit: u64,
    pub page: u64,
    pub skip: u64,
    pub total_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub results: Vec<T>,
    pub metadata: ListMetadata,
}

impl<T> ListResponse<T> {
    pub fn new(results: Vec<T>, paging: &Paging, total_count: u64) -> Self {
        Self {
            metadata: ListMetadata {
                count: results.len(),
                limit: paging.limit,
                page: paging.page,
                skip: paging.skip,
                total_count,
            },
            results,
        }
    }
}

/// Earnings payment as exposed through the API
#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub nonce: u64,
    pub timestamp: i64,
    pub data: TxData,
    pub hash: String,
    pub signature: String,
}

impl From<EarningsPayment> for PaymentView {
    fn from(p: EarningsPayment) -> Self {
        Self {
            sender: p.sender,
            recipient: p.recipient,
            amount: p.amount,
            nonce: p.nonce,
            timestamp: p.timestamp,
            data: p.data,
            hash: p.hash,
            signature: p.signature,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PayoutTxView {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub nonce: u64,
    pub data: PayoutData,
    pub hash: Option<String>,
    pub signature: Option<String>,
}

/// Payout without submission bookkeeping
#[derive(Debug, Serialize)]
pub struct PayoutView {
    pub draw: String,
    pub status: PayoutStatus,
    pub tx: PayoutTxView,
}

impl From<Payout> for PayoutView {
    fn from(p: Payout) -> Self {
        Self {
            draw: p.draw,
            status: p.status,
            tx: PayoutTxView {
                sender: p.tx.sender,
                recipient: p.tx.recipient,
                amount: p.tx.amount,
                nonce: p.tx.nonce,
                data: p.tx.data,
                hash: p.tx.hash,
                signature: p.tx.signature,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DrawResponse {
    pub draw: Draw,
    pub payouts: BTreeMap<String, PayoutView>,
}

impl DrawResponse {
    pub fn new(draw: Draw, payouts: Vec<Payout>) -> Self {
        Self {
            draw,
            payouts: payouts.into_iter().map(|p| (p.key.clone(), p.into())).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PayerView {
    pub address: String,
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Debug, Serialize)]
pub struct PayerResponse {
    pub payer: PayerView,
}

#[derive(Debug, Serialize)]
pub struct FundsView {
    pub distribution: Vec<u64>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub funds: FundsView,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: &'static str,
}
