//! PostgreSQL implementation of [`ChainStore`].
//!
//! One `PgConnection`, lazily (re)established. Session-level
//! `synchronous_commit` is switched off right after connecting so that
//! status-only commits are cheap; the block-writing commit path re-enables
//! it with `SET LOCAL` for that transaction only.
//!
//! On connection-fatal errors the cached connection is dropped, so the next
//! `connect()` reports [`Connected::Fresh`] and the mining loop rebuilds its
//! session state (tip, statement timeout, server version check).

use crate::domain::{BlockRow, ContractRow, PendingRow};
use crate::error::{Result, StoreError};
use crate::ports::{ChainStore, Connected};
use crate::BINDING_PREFIX;
use async_trait::async_trait;
use shared_types::{Block, Contract, Hash256, PendingTransaction, ProcessedTransaction};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Executor, Row};
use tracing::debug;

const FETCH_PENDING_SQL: &str = "SELECT transaction_id, version, contract_hash, valid_till, \
     payload, public_key, signature, create_ts \
     FROM basics.transactions WHERE status = 'new' \
     ORDER BY create_ts ASC, transaction_id ASC LIMIT $1";

const LATEST_BLOCK_SQL: &str = "SELECT block_id, version, previous_block_hash, processed_ts, \
     transactions, transactions_amount, signature \
     FROM basics.blocks ORDER BY block_id DESC LIMIT 1";

const FETCH_CONTRACTS_SQL: &str = "SELECT contract_hash, contract_type, contract_version, description, creator, \
     contract_template::text AS contract_template, code, abi_version \
     FROM basics.contracts";

const INSERT_BLOCK_SQL: &str = "INSERT INTO basics.blocks (block_id, version, previous_block_hash, \
     processed_ts, transactions, transactions_amount, signature) \
     VALUES ($1, $2, $3, $4, $5, $6, $7)";

const INSERT_CONTRACT_SQL: &str = "INSERT INTO basics.contracts (contract_hash, contract_type, \
     contract_version, description, creator, contract_template, code, abi_version) \
     VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7, $8)";

const BULK_UPDATE_SQL: &str = "UPDATE basics.transactions AS t SET \
     status = r.status, message = r.message, processed_ts = r.processed_ts, \
     contract_type = r.contract_type, sender = r.sender, receiver = r.receiver, \
     block_id = r.block_id, position_in_block = r.position_in_block \
     FROM jsonb_to_recordset($1::jsonb) AS r(\
     transaction_id uuid, status text, message text, processed_ts bigint, \
     contract_type text, sender text, receiver text, block_id bigint, \
     position_in_block int) \
     WHERE t.transaction_id = r.transaction_id";

/// The production [`ChainStore`]: one exclusive PostgreSQL connection.
pub struct PostgresGateway {
    options: PgConnectOptions,
    conn: Option<PgConnection>,
}

impl PostgresGateway {
    /// Create a gateway that will connect with the given options.
    pub fn new(options: PgConnectOptions) -> Self {
        Self {
            options,
            conn: None,
        }
    }

    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.conn.as_mut().ok_or(StoreError::NotConnected)
    }

    /// Wrap a driver error, dropping the connection when it is gone.
    fn fail(&mut self, e: sqlx::Error) -> StoreError {
        let err = StoreError::from(e);
        if err.is_connection_fatal() {
            debug!("dropping store connection after fatal error");
            self.conn = None;
        }
        err
    }

    async fn exec(&mut self, sql: &str) -> Result<()> {
        let conn = self.conn()?;
        match Executor::execute(conn, sqlx::raw_sql(sql)).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }
}

#[async_trait]
impl ChainStore for PostgresGateway {
    async fn connect(&mut self) -> Result<Connected> {
        if self.conn.is_some() {
            return Ok(Connected::Existing);
        }

        let mut conn = self.options.clone().connect().await?;
        // Fast path for status-only commits; block commits override this
        // with SET LOCAL.
        Executor::execute(&mut conn, sqlx::raw_sql("SET synchronous_commit TO OFF;")).await?;

        self.conn = Some(conn);
        Ok(Connected::Fresh)
    }

    async fn fetch_pending(&mut self, limit: i64) -> Result<Vec<PendingTransaction>> {
        let conn = self.conn()?;
        let q = sqlx::query_as::<_, PendingRow>(FETCH_PENDING_SQL).bind(limit);
        let rows = match q.fetch_all(conn).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(e)),
        };
        rows.into_iter().map(PendingTransaction::try_from).collect()
    }

    async fn fetch_latest_block(&mut self) -> Result<Option<Block>> {
        let conn = self.conn()?;
        let q = sqlx::query_as::<_, BlockRow>(LATEST_BLOCK_SQL);
        let row = match q.fetch_optional(conn).await {
            Ok(row) => row,
            Err(e) => return Err(self.fail(e)),
        };
        row.map(Block::try_from).transpose()
    }

    async fn fetch_contracts(&mut self) -> Result<Vec<Contract>> {
        let conn = self.conn()?;
        let q = sqlx::query_as::<_, ContractRow>(FETCH_CONTRACTS_SQL);
        let rows = match q.fetch_all(conn).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(e)),
        };
        rows.into_iter().map(Contract::try_from).collect()
    }

    async fn fetch_server_version(&mut self) -> Result<i64> {
        let conn = self.conn()?;
        let q = sqlx::query_scalar::<_, i64>("SELECT current_setting('server_version_num')::bigint");
        match q.fetch_one(conn).await {
            Ok(version) => Ok(version),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn set_statement_timeout(&mut self, millis: i64) -> Result<()> {
        let millis = millis.max(0);
        self.exec(&format!("SET statement_timeout TO {millis};")).await
    }

    async fn begin_block(&mut self) -> Result<()> {
        self.exec("BEGIN; SET LOCAL ROLE smartcontract; SAVEPOINT tx;")
            .await
    }

    async fn savepoint_rollback(&mut self) -> Result<()> {
        self.exec("ROLLBACK TO SAVEPOINT tx;").await
    }

    async fn savepoint_advance(&mut self) -> Result<()> {
        self.exec("RELEASE SAVEPOINT tx; SAVEPOINT tx;").await
    }

    async fn reset_role(&mut self) -> Result<()> {
        self.exec("RESET ROLE;").await
    }

    async fn run_contract_code(
        &mut self,
        code: &str,
        bindings: &[(&'static str, String)],
    ) -> Result<Option<String>> {
        for (name, value) in bindings {
            let guc = format!("{BINDING_PREFIX}.{name}");
            let conn = self.conn()?;
            let q = sqlx::query("SELECT set_config($1, $2, true)")
                .bind(guc)
                .bind(value);
            if let Err(e) = q.execute(conn).await {
                return Err(self.fail(e));
            }
        }

        let conn = self.conn()?;
        let rows = match Executor::fetch_all(conn, sqlx::raw_sql(code)).await {
            Ok(rows) => rows,
            // Reduce script failures to SQLSTATE + message; the contract
            // runtime classifies on exactly those.
            Err(sqlx::Error::Database(db)) => {
                let sqlstate = db.code().map(|c| c.into_owned()).unwrap_or_default();
                let err = StoreError::Script {
                    sqlstate,
                    message: db.message().to_string(),
                };
                if err.is_connection_fatal() {
                    self.conn = None;
                }
                return Err(err);
            }
            Err(e) => return Err(self.fail(e)),
        };

        match rows.last() {
            None => Ok(None),
            Some(row) => row
                .try_get::<Option<String>, _>(0)
                .map_err(|_| StoreError::BadRow("contract result is not text".into())),
        }
    }

    async fn create_contract(&mut self, contract: &Contract) -> Result<()> {
        let template = serde_json::to_string(&contract.template)
            .map_err(|e| StoreError::BadRow(format!("contract template: {e}")))?;

        self.exec("SET LOCAL ROLE smartcontractmanager;").await?;
        let conn = self.conn()?;
        let q = sqlx::query(INSERT_CONTRACT_SQL)
            .bind(contract.hash.to_vec())
            .bind(&contract.contract_type)
            .bind(&contract.version)
            .bind(&contract.description)
            .bind(&contract.creator)
            .bind(template)
            .bind(&contract.code)
            .bind(contract.abi_version as i16);
        let res = q.execute(conn).await;
        if let Err(e) = res {
            return Err(self.fail(e));
        }
        self.exec("SET LOCAL ROLE smartcontract;").await
    }

    async fn delete_contract(&mut self, hash: &Hash256) -> Result<()> {
        self.exec("SET LOCAL ROLE smartcontractmanager;").await?;
        let conn = self.conn()?;
        let q = sqlx::query("DELETE FROM basics.contracts WHERE contract_hash = $1").bind(hash.to_vec());
        let res = q.execute(conn).await;
        if let Err(e) = res {
            return Err(self.fail(e));
        }
        self.exec("SET LOCAL ROLE smartcontract;").await
    }

    async fn bulk_update_statuses(&mut self, rows: &[ProcessedTransaction]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let json = serde_json::to_string(rows)
            .map_err(|e| StoreError::BadRow(format!("status rows: {e}")))?;
        let conn = self.conn()?;
        let q = sqlx::query(BULK_UPDATE_SQL).bind(json);
        match q.execute(conn).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn insert_block(&mut self, block: &Block) -> Result<()> {
        let conn = self.conn()?;
        let q = sqlx::query(INSERT_BLOCK_SQL)
            .bind(block.block_id)
            .bind(block.version as i16)
            .bind(block.previous_block_hash.to_vec())
            .bind(block.processed_ts)
            .bind(&block.transactions)
            .bind(block.transactions_amount as i32)
            .bind(block.signature.to_vec());
        match q.execute(conn).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn commit_durable(&mut self) -> Result<()> {
        self.exec("SET LOCAL synchronous_commit TO ON; COMMIT;").await
    }

    async fn commit_fast(&mut self) -> Result<()> {
        self.exec("COMMIT;").await
    }

    async fn rollback_all(&mut self) -> Result<()> {
        self.exec("ROLLBACK;").await
    }

    async fn notify(&mut self, channel: &str, payload: &str) -> Result<()> {
        let conn = self.conn()?;
        let q = sqlx::query("SELECT pg_notify($1, $2)").bind(channel).bind(payload);
        match q.execute(conn).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }
}
