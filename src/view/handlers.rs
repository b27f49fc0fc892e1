//! Terminal CRUD handlers of a view.
//!
//! Each handler builds its statements from the context, then either runs
//! them (`Mode::Execute`) or returns them rendered (`Mode::Compile`).

use serde_json::Value;

use super::context::Context;
use super::pipeline::Mode;
use super::response::{Envelope, Meta, PageMeta, Reply};
use super::View;
use crate::database::render::{render_delete, render_insert, render_select, render_update_all};
use crate::database::statement::COUNT_LABEL;
use crate::database::{BindParams, SelectPlan, SelectQuery, StatementBuilder};
use crate::error::ApiError;
use crate::filter::SqlResult;
use crate::types::Operation;

fn compiled(statements: Vec<SqlResult>) -> Result<Reply, ApiError> {
    let data = serde_json::to_value(&statements)
        .map_err(|e| ApiError::internal_server_error(format!("Failed to serialize statements: {}", e)))?;
    Ok(Envelope::new(200, "Compile ok!").with_data(data).into())
}

/// Bind values for `$bind` clauses of a select: the `data` object of the form
fn select_binds(form: &Value) -> BindParams {
    form.get("data").and_then(Value::as_object).cloned().unwrap_or_default()
}

impl View {
    pub(crate) async fn terminal(&self, operation: Operation, ctx: &mut Context, mode: Mode) -> Result<Reply, ApiError> {
        tracing::debug!("{:?} on {} ({:?})", operation, self.name(), mode);
        match operation {
            Operation::Select => self.handle_select(ctx, mode).await,
            Operation::Insert => self.handle_insert(ctx, mode).await,
            Operation::Update => self.handle_update(ctx, mode).await,
            Operation::Delete => self.handle_delete(ctx, mode).await,
        }
    }

    async fn handle_select(&self, ctx: &Context, mode: Mode) -> Result<Reply, ApiError> {
        let config = self.config();
        let keys = ctx.filter();
        let builder = StatementBuilder::new(&config.table, &keys, &config.options);
        let mut query = SelectQuery::from_form(&ctx.form_data, config.options.max_limit);
        query.paginate = !ctx.has_param;
        let binds = select_binds(&ctx.form_data);
        let dialect = self.storage().dialect();

        match builder.select(&query)? {
            SelectPlan::Single(select) => {
                let sql = render_select(dialect, &select, &binds)?;
                tracing::debug!("select: {}", sql.query);
                if mode == Mode::Compile {
                    return compiled(vec![sql]);
                }
                let data = if ctx.has_param {
                    self.storage()
                        .fetch_optional(&sql)
                        .await?
                        .map(Value::Object)
                        .unwrap_or(Value::Null)
                } else {
                    let rows = self.storage().fetch_all(&sql).await?;
                    Value::Array(rows.into_iter().map(Value::Object).collect())
                };
                Ok(Envelope::new(200, "Query ok!").with_data(data).into())
            }
            SelectPlan::Paged { data, count, pagination } => {
                let count_sql = render_select(dialect, &count, &binds)?;
                let data_sql = render_select(dialect, &data, &binds)?;
                tracing::debug!("select: {} / {}", data_sql.query, count_sql.query);
                if mode == Mode::Compile {
                    return compiled(vec![data_sql, count_sql]);
                }
                let total = self
                    .storage()
                    .fetch_optional(&count_sql)
                    .await?
                    .and_then(|row| row.get(COUNT_LABEL).and_then(Value::as_u64))
                    .unwrap_or(0);
                let rows = self.storage().fetch_all(&data_sql).await?;
                let meta = Meta {
                    pagination: Some(PageMeta {
                        total,
                        count: rows.len() as u64,
                        skip: pagination.offset,
                        limit: pagination.limit,
                    }),
                    ..Default::default()
                };
                let data = Value::Array(rows.into_iter().map(Value::Object).collect());
                Ok(Envelope::new(200, "Query ok!").with_data(data).with_meta(meta).into())
            }
        }
    }

    async fn handle_insert(&self, ctx: &Context, mode: Mode) -> Result<Reply, ApiError> {
        let config = self.config();
        let keys = ctx.filter();
        let insert = StatementBuilder::new(&config.table, &keys, &config.options).insert(&ctx.form_data)?;
        let sql = render_insert(self.storage().dialect(), &insert)?;
        tracing::debug!("insert: {}", sql.query);
        if mode == Mode::Compile {
            return compiled(vec![sql]);
        }
        let outcome = self.storage().execute_insert(&sql).await?;
        let meta = Meta {
            count: Some(outcome.count),
            rowid: if outcome.count == 1 { outcome.rowid } else { None },
            pagination: None,
        };
        Ok(Envelope::new(201, "Insert ok!").with_meta(meta).into())
    }

    async fn handle_update(&self, ctx: &Context, mode: Mode) -> Result<Reply, ApiError> {
        let config = self.config();
        let keys = ctx.filter();
        let updates = StatementBuilder::new(&config.table, &keys, &config.options).update(&ctx.form_data)?;
        let dialect = self.storage().dialect();
        let mut sqls = Vec::new();
        for update in &updates {
            sqls.extend(render_update_all(dialect, update)?);
        }
        if mode == Mode::Compile {
            return compiled(sqls);
        }
        let count = match sqls.as_slice() {
            [single] => self.storage().execute(single).await?,
            many => self.storage().execute_batch(many).await?,
        };
        Ok(Envelope::new(201, "Update ok!").with_meta(Meta { count: Some(count), ..Default::default() }).into())
    }

    async fn handle_delete(&self, ctx: &Context, mode: Mode) -> Result<Reply, ApiError> {
        let config = self.config();
        let keys = ctx.filter();
        let delete = StatementBuilder::new(&config.table, &keys, &config.options).delete(&ctx.form_data);
        if delete.filter.is_none() && !config.allow_full_delete {
            tracing::warn!("Refused unconditional delete on {}", self.name());
            return Err(ApiError::bad_request(format!("Refusing to delete every row of {}", self.name())));
        }
        let sql = render_delete(self.storage().dialect(), &delete, &BindParams::new())?;
        tracing::debug!("delete: {}", sql.query);
        if mode == Mode::Compile {
            return compiled(vec![sql]);
        }
        let count = self.storage().execute(&sql).await?;
        Ok(Envelope::new(200, "Delete ok!").with_meta(Meta { count: Some(count), ..Default::default() }).into())
    }
}
