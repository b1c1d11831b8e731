use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;

use jobboard_core::{
    Application, ApplicationWithApplicant, ApplicationWithJob, Job, Role, SearchQuery, User,
};

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Pragmas are part of the connect options so every pooled connection
    /// enforces foreign keys.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Writes the fixed role definitions. Safe to call on every startup.
    pub async fn initialize_roles(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for role in Role::ALL {
            sqlx::query("INSERT INTO roles (name, label) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
                .bind(role.as_str())
                .bind(role.label())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Returns a handle for user accounts.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for login sessions.
    pub fn sessions(&self) -> SessionRepository {
        SessionRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for job listings.
    pub fn jobs(&self) -> JobRepository {
        JobRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for job applications.
    pub fn applications(&self) -> ApplicationRepository {
        ApplicationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn constraint_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> Result<User, UserError> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|err| UserError::CorruptRole(err.0))?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            role,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialsRow {
    id: i64,
    username: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
    password_hash: String,
}

/// Account together with its stored password hash, used only to log in.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// Data required to create an account.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Result of attempting to create an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCreateOutcome {
    Created(User),
    DuplicateUsername,
}

/// Errors that can occur while reading or writing accounts.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("role definitions are missing; initialize roles before registering users")]
    MissingRole,
    #[error("stored account has an unknown role: {0}")]
    CorruptRole(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `users` table.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Inserts a new account. A taken username is reported as an outcome.
    pub async fn create(&self, record: &NewUser<'_>) -> Result<UserCreateOutcome, UserError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (username, email, password_hash, role, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING id, username, email, role, created_at",
        )
        .bind(record.username)
        .bind(record.email)
        .bind(record.password_hash)
        .bind(record.role.as_str())
        .bind(to_rfc3339(record.created_at))
        .fetch_all(&mut *tx)
        .await;

        let row = match result {
            Ok(rows) => rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)?,
            Err(err) => {
                return match constraint_code(&err).as_deref() {
                    Some(SQLITE_CONSTRAINT_UNIQUE) => Ok(UserCreateOutcome::DuplicateUsername),
                    Some(SQLITE_CONSTRAINT_FOREIGNKEY) => Err(UserError::MissingRole),
                    _ => Err(UserError::Database(err)),
                }
            }
        };
        tx.commit().await?;

        Ok(UserCreateOutcome::Created(row.into_domain()?))
    }

    /// Loads the account and password hash for a username.
    pub async fn find_credentials(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, UserError> {
        let row = sqlx::query_as::<_, CredentialsRow>(
            "SELECT id, username, email, role, created_at, password_hash \
               FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user = UserRow {
            id: row.id,
            username: row.username,
            email: row.email,
            role: row.role,
            created_at: row.created_at,
        }
        .into_domain()?;
        Ok(Some(UserCredentials {
            user,
            password_hash: row.password_hash,
        }))
    }

    /// Fetches an account by id.
    pub async fn fetch(&self, id: i64) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, role, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_domain).transpose()
    }
}

/// Data required to open a session.
pub struct NewSession<'a> {
    pub token_hash: &'a str,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Errors that can occur while managing sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session refers to a missing user")]
    MissingUser,
    #[error("failed to load session user: {0}")]
    User(#[from] UserError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `sessions` table. Tokens are stored hashed.
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub async fn insert(&self, record: &NewSession<'_>) -> Result<(), SessionError> {
        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(record.token_hash)
        .bind(record.user_id)
        .bind(to_rfc3339(record.created_at))
        .bind(to_rfc3339(record.expires_at))
        .execute(&self.pool)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => SessionError::MissingUser,
            _ => SessionError::Database(err),
        })?;
        Ok(())
    }

    /// Resolves the user behind an unexpired session.
    pub async fn find_user(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, SessionError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.username, u.email, u.role, u.created_at \
               FROM sessions AS s \
               JOIN users AS u ON u.id = s.user_id \
              WHERE s.token_hash = ? AND s.expires_at > ?",
        )
        .bind(token_hash)
        .bind(to_rfc3339(now))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_domain).transpose()?)
    }

    /// Deletes a session, returning `true` when one existed.
    pub async fn delete(&self, token_hash: &str) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes sessions that expired at or before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(to_rfc3339(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

const JOB_COLUMNS: &str = "id, title, company_name, location, description, posted_by, created_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    title: String,
    company_name: String,
    location: String,
    description: String,
    posted_by: i64,
    created_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            company_name: row.company_name,
            location: row.location,
            description: row.description,
            posted_by: row.posted_by,
            created_at: row.created_at,
        }
    }
}

/// Data required to create a job listing.
pub struct NewJob<'a> {
    pub title: &'a str,
    pub company_name: &'a str,
    pub location: &'a str,
    pub description: &'a str,
    pub posted_by: i64,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur while reading or writing jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job owner does not exist")]
    MissingOwner,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `jobs` table.
#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub async fn insert(&self, record: &NewJob<'_>) -> Result<Job, JobError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO jobs (title, company_name, location, description, posted_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(record.title)
        .bind(record.company_name)
        .bind(record.location)
        .bind(record.description)
        .bind(record.posted_by)
        .bind(to_rfc3339(record.created_at))
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => JobError::MissingOwner,
            _ => JobError::Database(err),
        })?;
        let row = rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)?;
        tx.commit().await?;

        Ok(row.into())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Job>, JobError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }

    /// Lists the jobs posted by a user, newest first.
    pub async fn list_by_owner(&self, user_id: i64) -> Result<Vec<Job>, JobError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE posted_by = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    /// Lists every job matching `query` (all jobs when `None`), newest first.
    ///
    /// SQLite's `lower()` folds ASCII only, matching [`SearchQuery::matches`].
    pub async fn search(&self, query: Option<&SearchQuery>) -> Result<Vec<Job>, JobError> {
        let folded = query.map(SearchQuery::folded);
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
              WHERE ? IS NULL \
                 OR instr(lower(title), ?) > 0 \
                 OR instr(lower(company_name), ?) > 0 \
                 OR instr(lower(location), ?) > 0 \
              ORDER BY created_at DESC, id DESC"
        ))
        .bind(folded)
        .bind(folded)
        .bind(folded)
        .bind(folded)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }
}

const APPLICATION_COLUMNS: &str = "a.id, a.job_id, a.applicant_id, a.resume, a.cover_letter, a.applied_at";

#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    id: i64,
    job_id: i64,
    applicant_id: i64,
    resume: String,
    cover_letter: String,
    applied_at: DateTime<Utc>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            applicant_id: row.applicant_id,
            resume: row.resume,
            cover_letter: row.cover_letter,
            applied_at: row.applied_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationWithJobRow {
    #[sqlx(flatten)]
    application: ApplicationRow,
    job_title: String,
    company_name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationWithApplicantRow {
    #[sqlx(flatten)]
    application: ApplicationRow,
    applicant_username: String,
    applicant_email: String,
}

/// Data required to record an application.
pub struct NewApplication<'a> {
    pub job_id: i64,
    pub applicant_id: i64,
    pub resume: &'a str,
    pub cover_letter: &'a str,
    pub applied_at: DateTime<Utc>,
}

/// Result of attempting to record an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationInsertOutcome {
    Inserted(Application),
    Duplicate,
}

/// Errors that can occur while reading or writing applications.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("application refers to a missing job or applicant")]
    MissingReference,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `applications` table.
#[derive(Clone)]
pub struct ApplicationRepository {
    pool: SqlitePool,
}

impl ApplicationRepository {
    pub async fn exists(&self, job_id: i64, applicant_id: i64) -> Result<bool, ApplicationError> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM applications WHERE job_id = ? AND applicant_id = ?)",
        )
        .bind(job_id)
        .bind(applicant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    /// Inserts the application unless one already exists for the same
    /// `(job, applicant)` pair. The check and the write are one statement,
    /// so concurrent submissions cannot both succeed.
    pub async fn insert(
        &self,
        record: &NewApplication<'_>,
    ) -> Result<ApplicationInsertOutcome, ApplicationError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, ApplicationRow>(
            "INSERT INTO applications (job_id, applicant_id, resume, cover_letter, applied_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(job_id, applicant_id) DO NOTHING \
             RETURNING id, job_id, applicant_id, resume, cover_letter, applied_at",
        )
        .bind(record.job_id)
        .bind(record.applicant_id)
        .bind(record.resume)
        .bind(record.cover_letter)
        .bind(to_rfc3339(record.applied_at))
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => ApplicationError::MissingReference,
            _ => ApplicationError::Database(err),
        })?;
        tx.commit().await?;

        Ok(match rows.into_iter().next() {
            Some(row) => ApplicationInsertOutcome::Inserted(row.into()),
            None => ApplicationInsertOutcome::Duplicate,
        })
    }

    /// Lists a job's applications with applicant details, oldest first.
    pub async fn list_for_job(
        &self,
        job_id: i64,
    ) -> Result<Vec<ApplicationWithApplicant>, ApplicationError> {
        let rows = sqlx::query_as::<_, ApplicationWithApplicantRow>(&format!(
            "SELECT {APPLICATION_COLUMNS}, \
                    u.username AS applicant_username, \
                    u.email AS applicant_email \
               FROM applications AS a \
               JOIN users AS u ON u.id = a.applicant_id \
              WHERE a.job_id = ? \
              ORDER BY a.applied_at ASC, a.id ASC"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ApplicationWithApplicant {
                application: row.application.into(),
                applicant_username: row.applicant_username,
                applicant_email: row.applicant_email,
            })
            .collect())
    }

    /// Lists an applicant's applications with job details, newest first.
    pub async fn list_for_applicant(
        &self,
        applicant_id: i64,
    ) -> Result<Vec<ApplicationWithJob>, ApplicationError> {
        let rows = sqlx::query_as::<_, ApplicationWithJobRow>(&format!(
            "SELECT {APPLICATION_COLUMNS}, \
                    j.title AS job_title, \
                    j.company_name AS company_name \
               FROM applications AS a \
               JOIN jobs AS j ON j.id = a.job_id \
              WHERE a.applicant_id = ? \
              ORDER BY a.applied_at DESC, a.id DESC"
        ))
        .bind(applicant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ApplicationWithJob {
                application: row.application.into(),
                job_title: row.job_title,
                company_name: row.company_name,
            })
            .collect())
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    struct TestDb {
        db: Database,
        _dir: TempDir,
    }

    async fn setup_db() -> TestDb {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        db.initialize_roles().await.expect("roles");
        TestDb { db, _dir: dir }
    }

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("fixed time")
            .with_timezone(&Utc)
    }

    async fn create_user(db: &Database, username: &str, role: Role) -> User {
        let outcome = db
            .users()
            .create(&NewUser {
                username,
                email: &format!("{username}@example.com"),
                password_hash: "hash",
                role,
                created_at: at("2024-01-01T00:00:00Z"),
            })
            .await
            .expect("create user");
        match outcome {
            UserCreateOutcome::Created(user) => user,
            UserCreateOutcome::DuplicateUsername => panic!("unexpected duplicate"),
        }
    }

    async fn create_job(db: &Database, owner: &User, title: &str, created_at: &str) -> Job {
        db.jobs()
            .insert(&NewJob {
                title,
                company_name: "Acme",
                location: "NYC",
                description: "build things",
                posted_by: owner.id,
                created_at: at(created_at),
            })
            .await
            .expect("insert job")
    }

    fn new_application(job: &Job, applicant: &User) -> NewApplication<'static> {
        NewApplication {
            job_id: job.id,
            applicant_id: applicant.id,
            resume: "resumes/cv.pdf",
            cover_letter: "hello",
            applied_at: at("2024-01-02T00:00:00Z"),
        }
    }

    #[tokio::test]
    async fn migrations_apply() {
        let ctx = setup_db().await;
        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('roles', 'users', 'sessions', 'jobs', 'applications')")
                .fetch_one(ctx.db.pool())
                .await
                .expect("fetch tables");
        assert_eq!(tables.0, 5);
    }

    #[tokio::test]
    async fn initialize_roles_is_idempotent() {
        let ctx = setup_db().await;
        ctx.db.initialize_roles().await.expect("second init");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
            .fetch_one(ctx.db.pool())
            .await
            .expect("count roles");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn create_user_reports_duplicate_username() {
        let ctx = setup_db().await;
        let alice = create_user(&ctx.db, "alice", Role::Employer).await;
        assert_eq!(alice.role, Role::Employer);
        assert_eq!(alice.created_at, at("2024-01-01T00:00:00Z"));

        let outcome = ctx
            .db
            .users()
            .create(&NewUser {
                username: "alice",
                email: "other@example.com",
                password_hash: "hash",
                role: Role::Applicant,
                created_at: Utc::now(),
            })
            .await
            .expect("duplicate is an outcome");
        assert_eq!(outcome, UserCreateOutcome::DuplicateUsername);
    }

    #[tokio::test]
    async fn create_user_requires_initialized_roles() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("bare.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");

        let err = db
            .users()
            .create(&NewUser {
                username: "alice",
                email: "alice@example.com",
                password_hash: "hash",
                role: Role::Employer,
                created_at: Utc::now(),
            })
            .await
            .expect_err("roles are missing");
        assert!(matches!(err, UserError::MissingRole));
    }

    #[tokio::test]
    async fn find_credentials_returns_hash() {
        let ctx = setup_db().await;
        let bob = create_user(&ctx.db, "bob", Role::Applicant).await;

        let creds = ctx
            .db
            .users()
            .find_credentials("bob")
            .await
            .expect("query")
            .expect("bob exists");
        assert_eq!(creds.user, bob);
        assert_eq!(creds.password_hash, "hash");

        let missing = ctx.db.users().find_credentials("nobody").await.expect("query");
        assert!(missing.is_none());
        assert_eq!(ctx.db.users().fetch(bob.id).await.expect("fetch"), Some(bob));
    }

    #[tokio::test]
    async fn sessions_expire_and_can_be_deleted() {
        let ctx = setup_db().await;
        let bob = create_user(&ctx.db, "bob", Role::Applicant).await;
        let now = at("2024-01-01T00:00:00Z");
        let sessions = ctx.db.sessions();
        sessions
            .insert(&NewSession {
                token_hash: "token-a",
                user_id: bob.id,
                created_at: now,
                expires_at: now + ChronoDuration::hours(1),
            })
            .await
            .expect("insert session");

        let found = sessions.find_user("token-a", now).await.expect("lookup");
        assert_eq!(found.map(|user| user.id), Some(bob.id));

        let expired = sessions
            .find_user("token-a", now + ChronoDuration::hours(2))
            .await
            .expect("lookup");
        assert!(expired.is_none());

        let purged = sessions
            .purge_expired(now + ChronoDuration::hours(2))
            .await
            .expect("purge");
        assert_eq!(purged, 1);
        assert!(!sessions.delete("token-a").await.expect("delete"));
    }

    #[tokio::test]
    async fn session_insert_rejects_unknown_user() {
        let ctx = setup_db().await;
        let now = Utc::now();
        let err = ctx
            .db
            .sessions()
            .insert(&NewSession {
                token_hash: "token-b",
                user_id: 999,
                created_at: now,
                expires_at: now + ChronoDuration::hours(1),
            })
            .await
            .expect_err("missing user");
        assert!(matches!(err, SessionError::MissingUser));
    }

    #[tokio::test]
    async fn search_filters_across_three_fields_newest_first() {
        let ctx = setup_db().await;
        let alice = create_user(&ctx.db, "alice", Role::Employer).await;
        let older = create_job(&ctx.db, &alice, "Engineer", "2024-01-01T00:00:00Z").await;
        let newer = create_job(&ctx.db, &alice, "Designer", "2024-01-03T00:00:00Z").await;
        let other = ctx
            .db
            .jobs()
            .insert(&NewJob {
                title: "Chef",
                company_name: "Bistro",
                location: "Paris",
                description: "acme of cooking",
                posted_by: alice.id,
                created_at: at("2024-01-02T00:00:00Z"),
            })
            .await
            .expect("insert job");

        let all = ctx.db.jobs().search(None).await.expect("search all");
        let ids: Vec<i64> = all.iter().map(|job| job.id).collect();
        assert_eq!(ids, vec![newer.id, other.id, older.id]);

        let query = SearchQuery::parse(Some("ACME")).expect("query");
        let hits = ctx.db.jobs().search(Some(&query)).await.expect("search");
        let ids: Vec<i64> = hits.iter().map(|job| job.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert!(hits.iter().all(|job| query.matches(job)));

        let paris = SearchQuery::parse(Some("par")).expect("query");
        let hits = ctx.db.jobs().search(Some(&paris)).await.expect("search");
        assert_eq!(hits, vec![other]);
    }

    #[tokio::test]
    async fn search_treats_like_wildcards_literally() {
        let ctx = setup_db().await;
        let alice = create_user(&ctx.db, "alice", Role::Employer).await;
        create_job(&ctx.db, &alice, "Engineer", "2024-01-01T00:00:00Z").await;

        let query = SearchQuery::parse(Some("%")).expect("query");
        let hits = ctx.db.jobs().search(Some(&query)).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn list_by_owner_only_returns_own_jobs() {
        let ctx = setup_db().await;
        let alice = create_user(&ctx.db, "alice", Role::Employer).await;
        let carol = create_user(&ctx.db, "carol", Role::Employer).await;
        let job = create_job(&ctx.db, &alice, "Engineer", "2024-01-01T00:00:00Z").await;
        create_job(&ctx.db, &carol, "Manager", "2024-01-02T00:00:00Z").await;

        let jobs = ctx.db.jobs().list_by_owner(alice.id).await.expect("list");
        assert_eq!(jobs, vec![job.clone()]);
        assert_eq!(ctx.db.jobs().fetch(job.id).await.expect("fetch"), Some(job));
        assert_eq!(ctx.db.jobs().fetch(9999).await.expect("fetch"), None);
    }

    #[tokio::test]
    async fn insert_job_rejects_unknown_owner() {
        let ctx = setup_db().await;
        let err = ctx
            .db
            .jobs()
            .insert(&NewJob {
                title: "Ghost",
                company_name: "Nowhere",
                location: "Void",
                description: "none",
                posted_by: 42,
                created_at: Utc::now(),
            })
            .await
            .expect_err("owner missing");
        assert!(matches!(err, JobError::MissingOwner));
    }

    #[tokio::test]
    async fn second_application_is_reported_as_duplicate() {
        let ctx = setup_db().await;
        let alice = create_user(&ctx.db, "alice", Role::Employer).await;
        let bob = create_user(&ctx.db, "bob", Role::Applicant).await;
        let job = create_job(&ctx.db, &alice, "Engineer", "2024-01-01T00:00:00Z").await;
        let repo = ctx.db.applications();

        assert!(!repo.exists(job.id, bob.id).await.expect("exists"));
        let first = repo
            .insert(&new_application(&job, &bob))
            .await
            .expect("insert");
        assert!(matches!(first, ApplicationInsertOutcome::Inserted(_)));
        assert!(repo.exists(job.id, bob.id).await.expect("exists"));

        let second = repo
            .insert(&new_application(&job, &bob))
            .await
            .expect("duplicate is an outcome");
        assert_eq!(second, ApplicationInsertOutcome::Duplicate);

        let listed = repo.list_for_job(job.id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].applicant_username, "bob");
        assert_eq!(listed[0].applicant_email, "bob@example.com");

        let mine = repo.list_for_applicant(bob.id).await.expect("list");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].job_title, "Engineer");
        assert_eq!(mine[0].company_name, "Acme");
    }

    #[tokio::test]
    async fn concurrent_applications_create_a_single_record() {
        let ctx = setup_db().await;
        let alice = create_user(&ctx.db, "alice", Role::Employer).await;
        let bob = create_user(&ctx.db, "bob", Role::Applicant).await;
        let job = create_job(&ctx.db, &alice, "Engineer", "2024-01-01T00:00:00Z").await;

        let first_repo = ctx.db.applications();
        let second_repo = ctx.db.applications();
        let first_record = new_application(&job, &bob);
        let second_record = new_application(&job, &bob);
        let (first, second) = tokio::join!(
            first_repo.insert(&first_record),
            second_repo.insert(&second_record),
        );
        let outcomes = [first.expect("first"), second.expect("second")];
        let inserted = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ApplicationInsertOutcome::Inserted(_)))
            .count();
        assert_eq!(inserted, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications")
            .fetch_one(ctx.db.pool())
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn inserted_rows_are_visible_on_other_connections() {
        let ctx = setup_db().await;
        let mut reader = ctx.db.pool().acquire().await.expect("acquire reader");

        let alice = create_user(&ctx.db, "alice", Role::Employer).await;
        let bob = create_user(&ctx.db, "bob", Role::Applicant).await;
        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *reader)
            .await
            .expect("count users");
        assert_eq!(users, 2);

        let job = create_job(&ctx.db, &alice, "Engineer", "2024-01-01T00:00:00Z").await;
        let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE posted_by = ?")
            .bind(alice.id)
            .fetch_one(&mut *reader)
            .await
            .expect("count jobs");
        assert_eq!(jobs, 1);

        ctx.db
            .applications()
            .insert(&new_application(&job, &bob))
            .await
            .expect("insert application");
        let applications: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE job_id = ?")
                .bind(job.id)
                .fetch_one(&mut *reader)
                .await
                .expect("count applications");
        assert_eq!(applications, 1);
    }

    #[tokio::test]
    async fn application_insert_rejects_unknown_job() {
        let ctx = setup_db().await;
        let bob = create_user(&ctx.db, "bob", Role::Applicant).await;
        let err = ctx
            .db
            .applications()
            .insert(&NewApplication {
                job_id: 404,
                applicant_id: bob.id,
                resume: "resumes/cv.pdf",
                cover_letter: "hello",
                applied_at: Utc::now(),
            })
            .await
            .expect_err("job missing");
        assert!(matches!(err, ApplicationError::MissingReference));
    }
}
