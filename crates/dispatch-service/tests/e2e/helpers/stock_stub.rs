//! 库存服务桩
//!
//! 按商品预设响应序列，序列耗尽或未配置的商品返回 `200 true`。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;

#[derive(Clone, Default)]
pub struct StockStub {
    scripts: Arc<Mutex<HashMap<String, VecDeque<(u16, &'static str)>>>>,
    fallbacks: Arc<Mutex<HashMap<String, (u16, &'static str)>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StockStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该商品始终返回同一响应
    pub fn always(self, item: &str, status: u16, body: &'static str) -> Self {
        self.fallbacks
            .lock()
            .unwrap()
            .insert(item.to_string(), (status, body));
        self
    }

    /// 该商品依次返回给定响应
    pub fn then(self, item: &str, responses: &[(u16, &'static str)]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(item.to_string(), responses.iter().copied().collect());
        self
    }

    /// 按调用顺序记录的商品
    pub fn calls_for(&self, items: &[&str]) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|item| items.contains(&item.as_str()))
            .cloned()
            .collect()
    }

    pub fn call_count(&self, item: &str) -> usize {
        self.calls_for(&[item]).len()
    }

    /// 在临时端口上启动，返回端点地址
    pub async fn start(&self) -> Result<String> {
        let app = Router::new()
            .route("/api/stock", get(stock_handler))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}/api/stock"))
    }
}

async fn stock_handler(
    State(stub): State<StockStub>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let item = params.get("item").cloned().unwrap_or_default();
    stub.calls.lock().unwrap().push(item.clone());

    let scripted = stub
        .scripts
        .lock()
        .unwrap()
        .get_mut(&item)
        .and_then(VecDeque::pop_front);
    let fallback = stub.fallbacks.lock().unwrap().get(&item).copied();

    let (status, body) = scripted.or(fallback).unwrap_or((200, "true"));
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body.to_string(),
    )
}
