mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use restful_model::database::Storage;
use restful_model::error::ApiError;
use restful_model::types::Method;
use restful_model::view::{Context, Envelope, Next, Reply, Stage, StampField, View, ViewConfig};

/// Answers every request itself
struct Gate;

#[async_trait]
impl Stage for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn handle(&self, _ctx: &mut Context, _next: Next<'_>) -> Result<Reply, ApiError> {
        Ok(Envelope::new(403, "Closed").into())
    }
}

struct Fail;

#[async_trait]
impl Stage for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    async fn handle(&self, _ctx: &mut Context, _next: Next<'_>) -> Result<Reply, ApiError> {
        Err(ApiError::internal_server_error("stage exploded"))
    }
}

struct Panic;

#[async_trait]
impl Stage for Panic {
    fn name(&self) -> &str {
        "panic"
    }

    async fn handle(&self, _ctx: &mut Context, _next: Next<'_>) -> Result<Reply, ApiError> {
        panic!("stage panicked hard")
    }
}

/// Rewrites the posted account, then hands on
struct Rename(&'static str);

#[async_trait]
impl Stage for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Reply, ApiError> {
        if let Some(row) = ctx.form_data.as_object_mut() {
            row.insert("account".into(), json!(self.0));
        }
        next.run(ctx).await
    }
}

async fn count_users(server: &common::TestServer) -> Result<usize> {
    let body = server.client.get(server.url("/user")).send().await?.json::<Value>().await?;
    Ok(body["data"].as_array().map(Vec::len).unwrap_or_default())
}

#[tokio::test]
async fn methods_outside_the_allow_list_are_rejected() -> Result<()> {
    let database = common::database(&[common::user_table()]).await?;
    let config = ViewConfig::new(common::user_table()).methods([Method::Get]);
    let server = common::serve(database, vec![config]).await?;

    let res = server.client.post(server.url("/user")).json(&json!({"account": "a"})).send().await?;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.json::<Value>().await?, json!({"status": 405, "message": "Method Not Allowed"}));
    assert_eq!(count_users(&server).await?, 0);

    let res = server.client.head(server.url("/user")).send().await?;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn method_override_from_query() -> Result<()> {
    let server = common::user_server().await?;
    server.client.post(server.url("/user")).json(&json!({"account": "alice"})).send().await?;

    // a POST asking for get is served as a select
    let res = server
        .client
        .post(server.url("/user"))
        .query(&[("method", "get"), ("where", r#"{"account": "alice"}"#)])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<Value>().await?;
    assert_eq!(body["data"][0]["account"], "alice");

    let res = server.client.get(server.url("/user")).query(&[("method", "bogus")]).send().await?;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn overridden_delete_keeps_the_path_filter() -> Result<()> {
    let database = common::database(&[common::user_table()]).await?;
    let config = ViewConfig::new(common::user_table()).allow_full_delete(true);
    let server = common::serve(database, vec![config]).await?;
    server
        .client
        .post(server.url("/user"))
        .json(&json!([{"account": "a"}, {"account": "b"}, {"account": "c"}]))
        .send()
        .await?;

    let res = server.client.get(server.url("/user/1")).query(&[("method", "delete")]).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await?["meta"]["count"], 1);
    assert_eq!(count_users(&server).await?, 2);

    let body = server.client.get(server.url("/user/2")).send().await?.json::<Value>().await?;
    assert_eq!(body["data"]["account"], "b");
    Ok(())
}

#[tokio::test]
async fn overridden_delete_without_a_predicate_is_refused() -> Result<()> {
    let server = common::user_server().await?;
    server.client.post(server.url("/user")).json(&json!({"account": "a"})).send().await?;

    let res = server.client.get(server.url("/user")).query(&[("method", "delete")]).send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(count_users(&server).await?, 1);
    Ok(())
}

#[tokio::test]
async fn malformed_query_args_are_skipped() -> Result<()> {
    let server = common::user_server().await?;
    server
        .client
        .post(server.url("/user"))
        .json(&json!([{"account": "a"}, {"account": "b"}]))
        .send()
        .await?;

    let res = server
        .client
        .get(server.url("/user"))
        .query(&[("where", "{broken"), ("order", "\"-id\"")])
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<Value>().await?;
    assert_eq!(body["data"][0]["account"], "b");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn query_where_keeps_the_path_filter() -> Result<()> {
    let server = common::user_server().await?;
    server
        .client
        .post(server.url("/user"))
        .json(&json!([{"account": "alice"}, {"account": "bob"}]))
        .send()
        .await?;

    let body = server
        .client
        .get(server.url("/user/1"))
        .query(&[("where", r#"{"account": "bob"}"#)])
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(body["data"], Value::Null);

    let body = server
        .client
        .get(server.url("/user/2"))
        .query(&[("where", r#"{"account": "bob"}"#)])
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(body["data"]["id"], 2);
    Ok(())
}

#[tokio::test]
async fn short_circuit_skips_the_handler() -> Result<()> {
    let database = common::database(&[common::user_table()]).await?;
    let config = ViewConfig::new(common::user_table()).stage(Method::Post, Arc::new(Gate));
    let server = common::serve(database, vec![config]).await?;

    let res = server.client.post(server.url("/user")).json(&json!({"account": "a"})).send().await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.json::<Value>().await?, json!({"status": 403, "message": "Closed"}));
    assert_eq!(count_users(&server).await?, 0);
    Ok(())
}

#[tokio::test]
async fn stage_effects_reach_the_handler() -> Result<()> {
    let database = common::database(&[common::user_table()]).await?;
    let config = ViewConfig::new(common::user_table())
        .stage(Method::Post, Arc::new(Rename("renamed")))
        .stage(Method::Post, Arc::new(StampField::create_time()));
    let server = common::serve(database, vec![config]).await?;

    server.client.post(server.url("/user")).json(&json!({"account": "a"})).send().await?;
    let body = server.client.get(server.url("/user/1")).send().await?.json::<Value>().await?;
    assert_eq!(body["data"]["account"], "renamed");
    assert!(body["data"]["create_time"].as_i64().unwrap_or_default() > 0);
    Ok(())
}

#[tokio::test]
async fn stage_errors_and_panics_become_500() -> Result<()> {
    let database = common::database(&[common::user_table()]).await?;
    let config = ViewConfig::new(common::user_table())
        .stage(Method::Post, Arc::new(Fail))
        .stage(Method::Delete, Arc::new(Panic));
    let server = common::serve(database, vec![config]).await?;

    let res = server.client.post(server.url("/user")).json(&json!({"account": "a"})).send().await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.json::<Value>().await?, json!({"status": 500, "message": "stage exploded"}));

    let res = server.client.delete(server.url("/user/1")).send().await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.json::<Value>().await?["message"], "stage panicked hard");

    // the server keeps serving
    assert_eq!(count_users(&server).await?, 0);
    Ok(())
}

#[tokio::test]
async fn database_errors_become_500() -> Result<()> {
    // the view is served but its table was never created
    let database = common::database(&[]).await?;
    let server = common::serve(database, vec![ViewConfig::new(common::user_table())]).await?;

    let res = server.client.get(server.url("/user")).send().await?;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = res.json::<Value>().await?;
    assert_eq!(body["status"], 500);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    Ok(())
}

#[tokio::test]
async fn raw_dispatch_skips_checks() -> Result<()> {
    let database = common::database(&[common::user_table()]).await?;
    let storage: Arc<dyn Storage> = database.clone();
    let config = ViewConfig::new(common::user_table()).methods([Method::Get]).auth(Arc::new(Gate));
    let view = View::new(config, storage)?;

    let post = || Context::builder(Method::Post, "/user").form_data(json!({"account": "raw"})).build();
    assert_eq!(view.dispatch(post()).await.status(), 405);

    let reply = view.raw_dispatch(post()).await;
    assert_eq!(reply.status(), 201);

    let get = Context::builder(Method::Get, "/user").build();
    assert_eq!(view.dispatch(get.clone()).await.status(), 403);
    let reply = view.raw_dispatch(get).await;
    assert_eq!(reply.body()["data"][0]["account"], "raw");
    Ok(())
}

#[tokio::test]
async fn compile_returns_statements_without_running_them() -> Result<()> {
    let database = common::database(&[common::user_table()]).await?;
    let storage: Arc<dyn Storage> = database.clone();
    let view = View::new(ViewConfig::new(common::user_table()), storage)?;

    let ctx = Context::builder(Method::Get, "/user")
        .arg("where", r#"{"account": "alice"}"#)
        .arg("keys", r#"["id", "account"]"#)
        .build();
    let reply = view.compile(ctx).await;
    assert_eq!(
        reply.body(),
        json!({
            "status": 200,
            "message": "Compile ok!",
            "data": [{"query": "SELECT \"id\", \"account\" FROM \"user\" WHERE \"account\" = ?", "params": ["alice"]}]
        })
    );

    let ctx = Context::builder(Method::Post, "/user").form_data(json!({"account": "bob"})).build();
    let reply = view.compile(ctx).await;
    assert_eq!(reply.body()["data"][0]["query"], "INSERT INTO \"user\" (\"account\") VALUES (?)");

    let reply = view.dispatch(Context::builder(Method::Get, "/user").build()).await;
    assert_eq!(reply.body()["data"], json!([]));
    Ok(())
}
