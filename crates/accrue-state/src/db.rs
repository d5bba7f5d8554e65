use std::path::Path;

use accrue_core::account::{Account, DepositRecord, WithdrawRequest};
use accrue_core::error::AccrueError;
use accrue_core::types::AccountId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Transactional;
use tracing::debug;

/// Error type inside a store transaction closure.
pub type TxError = ConflictableTransactionError<AccrueError>;

/// Abort the surrounding transaction with `e`. Nothing it staged is written.
pub fn abort(e: AccrueError) -> TxError {
    ConflictableTransactionError::Abort(e)
}

fn storage(e: sled::Error) -> AccrueError {
    AccrueError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, AccrueError> {
    bincode::serialize(value).map_err(|e| AccrueError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AccrueError> {
    bincode::deserialize(bytes).map_err(|e| AccrueError::Serialization(e.to_string()))
}

fn handle_key(handle: &str) -> Vec<u8> {
    handle.trim().to_lowercase().into_bytes()
}

fn contact_key(contact: &str) -> Vec<u8> {
    contact.trim().to_lowercase().into_bytes()
}

fn id_from_ivec(bytes: &[u8]) -> Result<AccountId, AccrueError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AccrueError::Serialization("account id index entry is not 32 bytes".into()))?;
    Ok(AccountId::from_bytes(arr))
}

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   accounts     : AccountId bytes     → bincode(Account)
///   handles      : lowercased handle   → AccountId bytes
///   contacts     : lowercased contact  → AccountId bytes
///   withdrawals  : request id (u64 BE) → bincode(WithdrawRequest)
///   deposits     : observer tx id      → bincode(DepositRecord)
///
/// Single-account writes go through [`StateDb::update_account`], an
/// optimistic compare-and-swap loop. Writes spanning several records go
/// through [`StateDb::transact`].
pub struct StateDb {
    db: sled::Db,
    accounts: sled::Tree,
    handles: sled::Tree,
    contacts: sled::Tree,
    withdrawals: sled::Tree,
    deposits: sled::Tree,
}

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AccrueError> {
        let db = sled::open(path).map_err(storage)?;
        let accounts    = db.open_tree("accounts").map_err(storage)?;
        let handles     = db.open_tree("handles").map_err(storage)?;
        let contacts    = db.open_tree("contacts").map_err(storage)?;
        let withdrawals = db.open_tree("withdrawals").map_err(storage)?;
        let deposits    = db.open_tree("deposits").map_err(storage)?;
        Ok(Self { db, accounts, handles, contacts, withdrawals, deposits })
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    pub fn get_account(&self, id: &AccountId) -> Result<Option<Account>, AccrueError> {
        match self.accounts.get(id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Unconditional write. Only for seeding and repair; engines use
    /// `update_account` or `transact`.
    pub fn put_account(&self, account: &Account) -> Result<(), AccrueError> {
        let bytes = encode(account)?;
        self.accounts.insert(account.account_id.as_bytes(), bytes).map_err(storage)?;
        self.handles
            .insert(handle_key(&account.handle), account.account_id.as_bytes().to_vec())
            .map_err(storage)?;
        self.contacts
            .insert(contact_key(&account.contact), account.account_id.as_bytes().to_vec())
            .map_err(storage)?;
        Ok(())
    }

    pub fn account_id_for_handle(&self, handle: &str) -> Result<Option<AccountId>, AccrueError> {
        match self.handles.get(handle_key(handle)).map_err(storage)? {
            Some(bytes) => Ok(Some(id_from_ivec(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn iter_accounts(&self) -> Result<Vec<Account>, AccrueError> {
        let mut out = Vec::new();
        for item in self.accounts.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Conditional read-modify-write of one account.
    ///
    /// `f` runs on a freshly read copy. If it returns `Err`, nothing is
    /// written. If it returns `Ok`, the copy is stored with `version + 1`
    /// only if the stored bytes are still the ones that were read; otherwise
    /// the account is re-read and `f` runs again, up to `max_attempts` times.
    pub fn update_account<T>(
        &self,
        id: &AccountId,
        max_attempts: u32,
        mut f: impl FnMut(&mut Account) -> Result<T, AccrueError>,
    ) -> Result<T, AccrueError> {
        for attempt in 1..=max_attempts {
            let current = self
                .accounts
                .get(id.as_bytes())
                .map_err(storage)?
                .ok_or_else(|| AccrueError::UnknownAccount(id.to_string()))?;
            let mut account: Account = decode(&current)?;
            let out = f(&mut account)?;
            account.version += 1;
            let next = encode(&account)?;
            match self
                .accounts
                .compare_and_swap(id.as_bytes(), Some(&current), Some(next))
                .map_err(storage)?
            {
                Ok(()) => return Ok(out),
                Err(_) => debug!(account = %id, attempt, "concurrent write detected; retrying"),
            }
        }
        Err(AccrueError::Conflict { key: id.to_string(), attempts: max_attempts })
    }

    /// Run `f` as one serializable transaction over every tree.
    ///
    /// sled re-runs `f` on conflict, so it must not have side effects beyond
    /// the `LedgerTx` it is handed. Aborting with [`abort`] discards every
    /// staged write.
    pub fn transact<T>(
        &self,
        f: impl Fn(&LedgerTx<'_>) -> Result<T, TxError>,
    ) -> Result<T, AccrueError> {
        (&self.accounts, &self.handles, &self.contacts, &self.withdrawals, &self.deposits)
            .transaction(|(accounts, handles, contacts, withdrawals, deposits)| {
                let tx = LedgerTx { accounts, handles, contacts, withdrawals, deposits };
                f(&tx)
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => storage(e),
            })
    }

    // ── Withdrawals ──────────────────────────────────────────────────────────

    pub fn get_withdrawal(&self, id: u64) -> Result<Option<WithdrawRequest>, AccrueError> {
        match self.withdrawals.get(id.to_be_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn iter_withdrawals(&self) -> Result<Vec<WithdrawRequest>, AccrueError> {
        let mut out = Vec::new();
        for item in self.withdrawals.iter() {
            let (_, bytes) = item.map_err(storage)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Deposits ─────────────────────────────────────────────────────────────

    pub fn get_deposit(&self, transaction_id: &str) -> Result<Option<DepositRecord>, AccrueError> {
        match self.deposits.get(transaction_id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    /// Monotonic id, unique for the lifetime of the database.
    pub fn generate_id(&self) -> Result<u64, AccrueError> {
        self.db.generate_id().map_err(storage)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), AccrueError> {
        self.db.flush().map_err(storage)?;
        Ok(())
    }
}

// ── LedgerTx ──────────────────────────────────────────────────────────────────

/// Typed view over the trees inside one [`StateDb::transact`] call.
pub struct LedgerTx<'a> {
    accounts: &'a TransactionalTree,
    handles: &'a TransactionalTree,
    contacts: &'a TransactionalTree,
    withdrawals: &'a TransactionalTree,
    deposits: &'a TransactionalTree,
}

impl LedgerTx<'_> {
    pub fn get_account(&self, id: &AccountId) -> Result<Option<Account>, TxError> {
        match self.accounts.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    /// Like `get_account`, aborting with `UnknownAccount` when missing.
    pub fn load_account(&self, id: &AccountId) -> Result<Account, TxError> {
        self.get_account(id)?
            .ok_or_else(|| abort(AccrueError::UnknownAccount(id.to_string())))
    }

    /// Stage `account`, bumping its version.
    pub fn put_account(&self, account: &mut Account) -> Result<(), TxError> {
        account.version += 1;
        let bytes = encode(account).map_err(abort)?;
        self.accounts.insert(account.account_id.as_bytes().to_vec(), bytes)?;
        Ok(())
    }

    pub fn account_id_for_handle(&self, handle: &str) -> Result<Option<AccountId>, TxError> {
        match self.handles.get(handle_key(handle))? {
            Some(bytes) => Ok(Some(id_from_ivec(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    /// Stage a brand-new account and claim its handle and contact.
    pub fn insert_new_account(&self, account: &mut Account) -> Result<(), TxError> {
        if self.handles.get(handle_key(&account.handle))?.is_some()
            || self.accounts.get(account.account_id.as_bytes())?.is_some()
        {
            return Err(abort(AccrueError::HandleTaken(account.handle.clone())));
        }
        if self.contacts.get(contact_key(&account.contact))?.is_some() {
            return Err(abort(AccrueError::ContactTaken));
        }
        let id_bytes = account.account_id.as_bytes().to_vec();
        self.handles.insert(handle_key(&account.handle), id_bytes.clone())?;
        self.contacts.insert(contact_key(&account.contact), id_bytes)?;
        self.put_account(account)
    }

    pub fn get_withdrawal(&self, id: u64) -> Result<Option<WithdrawRequest>, TxError> {
        match self.withdrawals.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    pub fn put_withdrawal(&self, request: &WithdrawRequest) -> Result<(), TxError> {
        let bytes = encode(request).map_err(abort)?;
        self.withdrawals.insert(request.id.to_be_bytes().to_vec(), bytes)?;
        Ok(())
    }

    pub fn deposit_exists(&self, transaction_id: &str) -> Result<bool, TxError> {
        Ok(self.deposits.get(transaction_id.as_bytes())?.is_some())
    }

    pub fn put_deposit(&self, record: &DepositRecord) -> Result<(), TxError> {
        let bytes = encode(record).map_err(abort)?;
        self.deposits.insert(record.transaction_id.as_bytes().to_vec(), bytes)?;
        Ok(())
    }
}
