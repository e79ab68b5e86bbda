//! Key layout and transactional row access over the sled tree
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};

use super::error::{Error, Result};
use super::utils;

pub(crate) type Tx<T> = ConflictableTransactionResult<T, Error>;

pub(crate) mod keys {
    pub fn contract(id: &str) -> String {
        format!("contract/{id}")
    }
    pub fn rate(id: &str) -> String {
        format!("rate/{id}")
    }
    pub fn contract_revision(id: &str) -> String {
        format!("contract_rev/{id}")
    }
    pub fn rate_revision(id: &str) -> String {
        format!("rate_rev/{id}")
    }
    pub fn submission(id: &str) -> String {
        format!("submission/{id}")
    }
    pub fn package(id: &str) -> String {
        format!("package/{id}")
    }
    pub fn document(aggregate_id: &str, sha256: &str) -> String {
        format!("doc/{aggregate_id}/{sha256}")
    }
    pub fn bundle(revision_id: &str, kind: &str) -> String {
        format!("bundle/{revision_id}/{kind}")
    }
    pub const BUNDLE_JOB_PREFIX: &str = "bundle_job/";
    pub fn bundle_job(revision_id: &str, kind: &str) -> String {
        format!("{BUNDLE_JOB_PREFIX}{revision_id}/{kind}")
    }
}

/// Run `f` as one serializable unit of work; an abort leaves no writes behind.
pub(crate) fn run<T, F>(tree: &sled::Tree, f: F) -> Result<T>
where
    F: Fn(&TransactionalTree) -> Tx<T>,
{
    Ok(tree.transaction(f)?)
}

pub(crate) fn abort<T>(err: Error) -> Tx<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn get<T>(tx: &TransactionalTree, key: &str) -> Tx<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx.get(key.as_bytes())? {
        Some(bytes) => match minicbor::decode(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => abort(e.into()),
        },
        None => Ok(None),
    }
}

pub(crate) fn require<T>(tx: &TransactionalTree, key: &str, kind: &'static str, id: &str) -> Tx<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match get(tx, key)? {
        Some(value) => Ok(value),
        None => abort(Error::not_found(kind, id)),
    }
}

pub(crate) fn put<T: minicbor::Encode<()>>(tx: &TransactionalTree, key: &str, value: &T) -> Tx<()> {
    match minicbor::to_vec(value) {
        Ok(bytes) => {
            tx.insert(key.as_bytes(), bytes)?;
            Ok(())
        }
        Err(e) => abort(e.into()),
    }
}

pub(crate) fn new_id(hrp: &str) -> Tx<String> {
    match utils::new_uuid_to_bech32(hrp) {
        Ok(id) => Ok(id),
        Err(e) => abort(e),
    }
}

/// Read a row outside of a transaction.
pub(crate) fn read<T>(tree: &sled::Tree, key: &str) -> Result<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn write<T: minicbor::Encode<()>>(tree: &sled::Tree, key: &str, value: &T) -> Result<()> {
    tree.insert(key.as_bytes(), minicbor::to_vec(value)?)?;
    Ok(())
}
