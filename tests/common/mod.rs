#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;

use restful_model::database::{Column, Database, Storage, Table};
use restful_model::server;
use restful_model::view::{View, ViewConfig};

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub client: reqwest::Client,
    pub database: Arc<Database>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

/// Columns: id, account, role_name, email, password, score, create_time
pub fn user_table() -> Table {
    Table::new("user")
        .column(Column::integer("id").primary_key())
        .column(Column::string("account", 16).not_null())
        .column(Column::string("role_name", 16))
        .column(Column::string("email", 64))
        .column(Column::string("password", 128))
        .column(Column::integer("score"))
        .column(Column::big_integer("create_time"))
}

/// Fresh in-memory sqlite database with `tables` created
pub async fn database(tables: &[Table]) -> Result<Arc<Database>> {
    let database = Database::connect("sqlite::memory:").await.context("failed to open sqlite")?;
    for table in tables {
        database.create_table(table).await?;
    }
    Ok(Arc::new(database))
}

/// Serves `configs` on an unused port for the lifetime of the test runtime
pub async fn serve(database: Arc<Database>, configs: Vec<ViewConfig>) -> Result<TestServer> {
    let storage: Arc<dyn Storage> = database.clone();
    let views = configs
        .into_iter()
        .map(|config| View::new(config, storage.clone()).map(Arc::new))
        .collect::<Result<Vec<_>, _>>()?;
    let app = server::router(views, storage);

    // Pick an unused port for isolation
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let server = TestServer {
        port,
        base_url: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        database,
    };
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// One open `user` view over a fresh database
pub async fn user_server() -> Result<TestServer> {
    let database = database(&[user_table()]).await?;
    serve(database, vec![ViewConfig::new(user_table())]).await
}
