use crate::Database;
use crate::models::{AdminTransactionRow, ResetTokenRow, StatsRow, TransactionRow, UserRow};
use anyhow::Result;
use escrow_types::models::{Role, TransactionStatus};
use rusqlite::{Connection, Row, types::ToSql};

const USER_COLUMNS: &str = "id, username, email, password, role, created_at";
const TRANSACTION_COLUMNS: &str =
    "id, buyer_id, seller_id, amount_cents, description, status, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        role: Role,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, username, email, password_hash, role.as_str(), created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when no such user exists.
    pub fn update_user_role(&self, id: &str, role: Role) -> Result<bool> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("UPDATE users SET role = ?1 WHERE id = ?2", (role.as_str(), id))?;
            Ok(changed == 1)
        })
    }

    /// Deletes the user; owned transactions and reset tokens go with it.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }

    // -- Transactions --

    pub fn insert_transaction(&self, row: &TransactionRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO transactions (id, buyer_id, seller_id, amount_cents, description, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.buyer_id,
                    row.seller_id,
                    row.amount_cents,
                    row.description,
                    row.status,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_transaction(&self, id: &str) -> Result<Option<TransactionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"),
                [id],
                map_transaction,
            )
            .optional()
        })
    }

    pub fn list_transactions_by_buyer(&self, buyer_id: &str) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| query_transactions_for(conn, "buyer_id", buyer_id))
    }

    pub fn list_transactions_by_seller(&self, seller_id: &str) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| query_transactions_for(conn, "seller_id", seller_id))
    }

    pub fn list_all_transactions(&self) -> Result<Vec<AdminTransactionRow>> {
        self.with_conn(|conn| {
            // JOIN users to fetch both usernames in one query
            let mut stmt = conn.prepare(
                "SELECT t.id, t.buyer_id, t.seller_id, t.amount_cents, t.description, t.status, t.created_at,
                        b.username, s.username
                 FROM transactions t
                 LEFT JOIN users b ON t.buyer_id = b.id
                 LEFT JOIN users s ON t.seller_id = s.id
                 ORDER BY t.created_at DESC, t.rowid DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(AdminTransactionRow {
                        transaction: map_transaction(row)?,
                        buyer_username: row.get(7)?,
                        seller_username: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Conditional status update: moves `id` to `to` only if its current
    /// status is one of `from`. Returns whether a row changed. This is the
    /// only coordination point between concurrent requests and instances.
    pub fn transition_status(
        &self,
        id: &str,
        from: &[TransactionStatus],
        to: TransactionStatus,
        updated_at: &str,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (4..4 + from.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE transactions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status IN ({})",
                placeholders.join(", ")
            );

            let from_strs: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
            let to_str = to.as_str();
            let mut params: Vec<&dyn ToSql> =
                vec![&to_str as &dyn ToSql, &updated_at as &dyn ToSql, &id as &dyn ToSql];
            params.extend(from_strs.iter().map(|s| s as &dyn ToSql));

            let changed = conn.execute(&sql, params.as_slice())?;
            Ok(changed == 1)
        })
    }

    // -- Password reset tokens --

    /// Stores a fresh token for the user, discarding any previous ones so at
    /// most one can ever be redeemed.
    pub fn replace_reset_token(
        &self,
        id: &str,
        user_id: &str,
        otp_hash: &str,
        expires_at: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM password_reset_tokens WHERE user_id = ?1", [user_id])?;
            tx.execute(
                "INSERT INTO password_reset_tokens (id, user_id, otp_hash, expires_at, used, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                (id, user_id, otp_hash, expires_at, created_at),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Most recent unused token for the user, expired or not.
    pub fn get_unused_reset_token(&self, user_id: &str) -> Result<Option<ResetTokenRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, otp_hash, expires_at, used, created_at
                 FROM password_reset_tokens
                 WHERE user_id = ?1 AND used = 0
                 ORDER BY created_at DESC
                 LIMIT 1",
                [user_id],
                |row| {
                    Ok(ResetTokenRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        otp_hash: row.get(2)?,
                        expires_at: row.get(3)?,
                        used: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Counts a wrong guess; the token is burned once `max_attempts` is reached.
    pub fn record_failed_reset_attempt(&self, token_id: &str, max_attempts: u32) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE password_reset_tokens
                 SET attempts = attempts + 1,
                     used = CASE WHEN attempts + 1 >= ?2 THEN 1 ELSE used END
                 WHERE id = ?1",
                rusqlite::params![token_id, max_attempts],
            )?;
            Ok(())
        })
    }

    /// Atomically flips the token to used and stores the new password hash.
    /// Returns false (and changes nothing) if the token was already used.
    pub fn redeem_reset_token(
        &self,
        token_id: &str,
        user_id: &str,
        new_password_hash: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let claimed = tx.execute(
                "UPDATE password_reset_tokens SET used = 1 WHERE id = ?1 AND user_id = ?2 AND used = 0",
                (token_id, user_id),
            )?;
            if claimed != 1 {
                return Ok(false);
            }
            tx.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (new_password_hash, user_id),
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    // -- Admin aggregates --

    pub fn stats(&self) -> Result<StatsRow> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY role")?;
            let users_by_role = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM transactions GROUP BY status ORDER BY status")?;
            let transactions_by_status = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total_amount_cents: i64 = conn.query_row(
                "SELECT COALESCE(SUM(amount_cents), 0) FROM transactions",
                [],
                |row| row.get(0),
            )?;

            Ok(StatsRow {
                users_by_role,
                transactions_by_status,
                total_amount_cents,
            })
        })
    }
}

/// True when the error came from a UNIQUE constraint (duplicate email/username).
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    stmt.query_row([value], map_user).optional()
}

fn query_transactions_for(
    conn: &Connection,
    column: &str,
    user_id: &str,
) -> Result<Vec<TransactionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
         WHERE {column} = ?1
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt
        .query_map([user_id], map_transaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_transaction(row: &Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        id: row.get(0)?,
        buyer_id: row.get(1)?,
        seller_id: row.get(2)?,
        amount_cents: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
