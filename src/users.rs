//! User directory and phone verification codes
//!
//! Escrow operations only need to know who a user is and whether both of
//! their identity checks (phone and national ID) have passed; that is the
//! [`UserDirectory`] seam. [`StoreUserDirectory`] backs it with the `users`
//! table and also owns the one-time phone codes in `phone_verifications`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core_types::{RecordId, UserId};
use crate::entity::{self, Entity, MappingError, RowReader, fmt_timestamp, put, put_time};
use crate::error::{EscrowError, ValidationError};
use crate::store::{CREATED_AT, Fields, Filter, Record, RecordStore, StoreError, UPDATED_AT, fields};

/// What the escrow core needs to know about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    pub phone_verified: bool,
    pub nid_verified: bool,
}

impl UserProfile {
    #[inline]
    pub fn is_fully_verified(&self) -> bool {
        self.phone_verified && self.nid_verified
    }
}

pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when no such user exists.
    fn resolve(&self, user_id: UserId) -> Result<Option<UserProfile>, EscrowError>;
}

// ============================================================
// Rows
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    /// Both checks passed
    pub is_verified: bool,
    pub is_phone_verified: bool,
    pub is_nid_verified: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    fn passed(&self, column: &str) -> bool {
        match column {
            "isPhoneVerified" => self.is_phone_verified,
            "isNidVerified" => self.is_nid_verified,
            _ => false,
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.id,
            display_name: self.full_name.clone(),
            phone_verified: self.is_phone_verified,
            nid_verified: self.is_nid_verified,
        }
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "fullName",
        "email",
        "phone",
        "isVerified",
        "isPhoneVerified",
        "isNidVerified",
        CREATED_AT,
        UPDATED_AT,
    ];

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let row = RowReader::new(Self::TABLE, record);
        Ok(Self {
            id: row.id()?,
            full_name: row.string("fullName"),
            email: row.string("email"),
            phone: row.string("phone"),
            is_verified: row.flag("isVerified"),
            is_phone_verified: row.flag("isPhoneVerified"),
            is_nid_verified: row.flag("isNidVerified"),
            created_at: row.timestamp(CREATED_AT)?,
        })
    }

    fn to_fields(&self) -> Fields {
        let mut f = Fields::new();
        put(&mut f, "fullName", &self.full_name);
        put(&mut f, "email", &self.email);
        put(&mut f, "phone", &self.phone);
        put(&mut f, "isVerified", self.is_verified);
        put(&mut f, "isPhoneVerified", self.is_phone_verified);
        put(&mut f, "isNidVerified", self.is_nid_verified);
        put_time(&mut f, CREATED_AT, self.created_at.as_ref());
        f
    }
}

/// A one-time phone code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneVerification {
    pub id: RecordId,
    pub user_id: UserId,
    pub phone: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
}

impl PhoneVerification {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Entity for PhoneVerification {
    const TABLE: &'static str = "phone_verifications";
    const COLUMNS: &'static [&'static str] = &[
        "userId", "phone", "code", "expiresAt", "isUsed", CREATED_AT, UPDATED_AT,
    ];

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let row = RowReader::new(Self::TABLE, record);
        // A row without an expiry is treated as already expired
        let expires_at = row.timestamp("expiresAt")?.unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(Self {
            id: row.id()?,
            user_id: row.parse("userId")?,
            phone: row.string("phone"),
            code: row.string("code"),
            expires_at,
            is_used: row.flag("isUsed"),
        })
    }

    fn to_fields(&self) -> Fields {
        let mut f = Fields::new();
        put(&mut f, "userId", self.user_id);
        put(&mut f, "phone", &self.phone);
        put(&mut f, "code", &self.code);
        put(&mut f, "expiresAt", fmt_timestamp(&self.expires_at));
        put(&mut f, "isUsed", self.is_used);
        f
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

/// Which identity check passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Phone,
    Nid,
}

// ============================================================
// Store-backed directory
// ============================================================

/// Compare-and-set rounds for a verification flag before giving up.
const VERIFY_ATTEMPTS: u32 = 8;

pub struct StoreUserDirectory {
    store: Arc<RecordStore>,
    code_ttl: Duration,
}

impl StoreUserDirectory {
    pub fn new(store: Arc<RecordStore>, code_ttl: Duration) -> Self {
        Self { store, code_ttl }
    }

    pub fn get(&self, user_id: UserId) -> Result<Option<User>, EscrowError> {
        entity::find(&self.store, user_id)
    }

    fn require(&self, user_id: UserId) -> Result<User, EscrowError> {
        self.get(user_id)?
            .ok_or_else(|| EscrowError::not_found(format!("user {user_id}")))
    }

    /// Create an unverified user. Emails are unique (case-insensitive).
    pub fn register(&self, new_user: NewUser) -> Result<User, EscrowError> {
        let full_name = new_user.full_name.trim();
        let email = new_user.email.trim().to_ascii_lowercase();
        if full_name.is_empty() {
            return Err(ValidationError::MissingField("fullName").into());
        }
        if email.is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }

        let user = User {
            id: 0,
            full_name: full_name.to_string(),
            email: email.clone(),
            phone: new_user.phone.trim().to_string(),
            is_verified: false,
            is_phone_verified: false,
            is_nid_verified: false,
            created_at: None,
        };

        let record = self
            .store
            .create_unique(User::TABLE, &Filter::new().eq("email", email), user.to_fields())
            .map_err(|e| match e {
                StoreError::Conflict { .. } => ValidationError::AlreadyExists("email").into(),
                other => EscrowError::from(other),
            })?;
        let user = User::from_record(&record)?;
        info!(user_id = user.id, "User registered");
        Ok(user)
    }

    pub fn mark_phone_verified(&self, user_id: UserId) -> Result<User, EscrowError> {
        self.mark_verified(user_id, Check::Phone)
    }

    pub fn mark_nid_verified(&self, user_id: UserId) -> Result<User, EscrowError> {
        self.mark_verified(user_id, Check::Nid)
    }

    /// Set one check's flag; `isVerified` follows once both are set.
    ///
    /// Only this check's column is written. The other flag is read and then
    /// expected unchanged by a compare-and-set, so two checks passing at the
    /// same time cannot clear each other.
    fn mark_verified(&self, user_id: UserId, check: Check) -> Result<User, EscrowError> {
        let (own, other) = match check {
            Check::Phone => ("isPhoneVerified", "isNidVerified"),
            Check::Nid => ("isNidVerified", "isPhoneVerified"),
        };

        for attempt in 1..=VERIFY_ATTEMPTS {
            let record = self
                .store
                .find_by_id(User::TABLE, user_id)?
                .ok_or_else(|| EscrowError::not_found(format!("user {user_id}")))?;
            let observed = record.get(other).map(str::to_string);
            let other_passed = User::from_record(&record)?.passed(other);

            let expected = match &observed {
                Some(raw) => Filter::new().eq(other, raw.as_str()),
                None => Filter::new(),
            };
            let changes = fields([
                (own, "true".to_string()),
                ("isVerified", other_passed.to_string()),
            ]);

            match self.store.update_if(User::TABLE, user_id, &expected, changes) {
                Ok(record) => {
                    let user = User::from_record(&record)?;
                    info!(user_id, ?check, fully_verified = user.is_verified, "User check passed");
                    return Ok(user);
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(user_id, ?check, attempt, "Verification flags moved, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user_id, ?check, "Verification flags kept changing");
        Err(EscrowError::from(StoreError::Conflict {
            table: User::TABLE.to_string(),
            current: None,
        }))
    }

    // ============================================================
    // Phone codes
    // ============================================================

    /// Issue a fresh 6-digit code for `phone`, superseding unused ones.
    pub fn issue_code(&self, user_id: UserId, phone: &str) -> Result<PhoneVerification, EscrowError> {
        self.require(user_id)?;
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(ValidationError::MissingField("phone").into());
        }

        for stale in self.unused_codes(user_id)? {
            self.store
                .update(PhoneVerification::TABLE, stale.id, fields([("isUsed", "true")]))?;
        }

        let code = format!("{:06}", rand::thread_rng().gen_range(100_000..1_000_000));
        let pending = PhoneVerification {
            id: 0,
            user_id,
            phone: phone.to_string(),
            code,
            expires_at: Utc::now() + self.code_ttl,
            is_used: false,
        };
        let issued = entity::insert(&self.store, &pending)?;
        debug!(user_id, expires_at = %issued.expires_at, "Phone code issued");
        Ok(issued)
    }

    /// Consume `code`; on success the phone is recorded and marked verified.
    pub fn verify_code(&self, user_id: UserId, code: &str) -> Result<User, EscrowError> {
        let code = code.trim();
        let candidate = self
            .unused_codes(user_id)?
            .into_iter()
            .find(|v| v.code == code)
            .ok_or(ValidationError::InvalidCode)?;

        let consumed = self
            .store
            .update_if(
                PhoneVerification::TABLE,
                candidate.id,
                &Filter::new().eq("isUsed", "false"),
                fields([("isUsed", "true")]),
            )
            .map_err(|e| match e {
                StoreError::Conflict { .. } => ValidationError::InvalidCode.into(),
                other => EscrowError::from(other),
            })?;
        let consumed = PhoneVerification::from_record(&consumed)?;

        if consumed.is_expired_at(Utc::now()) {
            return Err(ValidationError::CodeExpired.into());
        }

        self.store
            .update(User::TABLE, user_id, fields([("phone", consumed.phone.as_str())]))?;
        self.mark_phone_verified(user_id)
    }

    /// Retire every expired, unused code. Returns how many were retired.
    pub fn sweep_expired(&self) -> Result<usize, EscrowError> {
        let now = Utc::now();
        let expired: Vec<PhoneVerification> =
            entity::find_where::<PhoneVerification>(&self.store, &Filter::new().eq("isUsed", "false"))?
                .into_iter()
                .filter(|v| v.is_expired_at(now))
                .collect();

        for v in &expired {
            self.store
                .update(PhoneVerification::TABLE, v.id, fields([("isUsed", "true")]))?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired phone codes swept");
        }
        Ok(expired.len())
    }

    fn unused_codes(&self, user_id: UserId) -> Result<Vec<PhoneVerification>, EscrowError> {
        entity::find_where(
            &self.store,
            &Filter::new()
                .eq("userId", user_id.to_string())
                .eq("isUsed", "false"),
        )
    }
}

impl UserDirectory for StoreUserDirectory {
    fn resolve(&self, user_id: UserId) -> Result<Option<UserProfile>, EscrowError> {
        Ok(self.get(user_id)?.map(|u| u.profile()))
    }
}
