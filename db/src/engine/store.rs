//! The global keyspace and the command dispatcher over it.

use crate::engine::hash::{HashIndex, hash_bytes};
use crate::engine::zset::SortedSet;
use crate::errors::ServerError;
use minkv_types::reply::Reply;

/// A keyed value: plain string bytes, or a sorted set.
pub(crate) enum Value {
    Str(Vec<u8>),
    Zset(SortedSet),
}

/// One entry in the keyspace. The key is carried in the entry itself so
/// rehash relocation and KEYS enumeration need nothing beyond the index.
pub(crate) struct Entry {
    key: Vec<u8>,
    value: Value,
}

/// Owns the process-wide keyspace. Created at startup, owned by the event
/// loop thread, and mutated only from command handlers.
pub struct StoreHandler {
    keyspace: HashIndex<Entry>,
}

impl Default for StoreHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreHandler {
    pub fn new() -> Self {
        StoreHandler {
            keyspace: HashIndex::new(),
        }
    }

    /// Runs one parsed request to completion. Semantic failures become ERR
    /// replies here; only framing-level trouble terminates a connection,
    /// and that is decided before this point.
    pub fn execute(&mut self, args: Vec<Vec<u8>>) -> Reply {
        match self.dispatch(args) {
            Ok(reply) => reply,
            Err(err) => Reply::err(err.to_string()),
        }
    }

    /// Selects the handler by case-insensitive command name and arity.
    fn dispatch(&mut self, mut args: Vec<Vec<u8>>) -> Result<Reply, ServerError> {
        let Some(first) = args.first() else {
            return Err(ServerError::EmptyCommand);
        };
        let command = first.to_ascii_lowercase();
        match (command.as_slice(), args.len()) {
            (b"keys", 1) => Ok(self.keys()),
            (b"get", 2) => self.get(&args[1]),
            (b"set", 3) => {
                let value = args.swap_remove(2);
                let key = args.swap_remove(1);
                Ok(self.set(&key, value))
            }
            (b"del", 2) => Ok(self.del(&args[1])),
            (b"zadd", arity) if arity >= 4 => self.zadd(&args),
            (b"zscore", 3) => self.zscore(&args[1], &args[2]),
            (b"zrange", 4 | 5) => self.zrange(&args),
            _ => Err(ServerError::UnknownCommand),
        }
    }

    /// GET key
    #[tracing::instrument(skip_all)]
    fn get(&mut self, key: &[u8]) -> Result<Reply, ServerError> {
        match self.keyspace.lookup(hash_bytes(key), |e| e.key == key) {
            None => Ok(Reply::Nil),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Reply::Str(value.clone())),
            Some(_) => Err(ServerError::ExpectingStringType),
        }
    }

    /// SET key value: updates a string entry in place, replaces an entry
    /// of any other type wholesale.
    #[tracing::instrument(skip_all)]
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Reply {
        let hash = hash_bytes(key);
        let mut value = Some(value);
        if let Some(Entry {
            value: Value::Str(current),
            ..
        }) = self.keyspace.lookup_mut(hash, |e| e.key == key)
        {
            if let Some(new) = value.take() {
                *current = new;
            }
        }
        if let Some(new) = value.take() {
            self.keyspace.remove(hash, |e| e.key == key);
            self.keyspace.insert(
                hash,
                Entry {
                    key: key.to_vec(),
                    value: Value::Str(new),
                },
            );
        }
        Reply::str("OK")
    }

    /// DEL key: removes an entry of any type.
    #[tracing::instrument(skip_all)]
    fn del(&mut self, key: &[u8]) -> Reply {
        match self.keyspace.remove(hash_bytes(key), |e| e.key == key) {
            Some(_) => Reply::Int(1),
            None => Reply::Int(0),
        }
    }

    /// KEYS: enumerates every key, scanning both hash tables.
    #[tracing::instrument(skip_all)]
    fn keys(&self) -> Reply {
        let mut items = Vec::with_capacity(self.keyspace.len());
        for entry in self.keyspace.iter() {
            items.push(Reply::Str(entry.key.clone()));
        }
        Reply::Arr(items)
    }

    /// ZADD key score member [score member ...]: creates the sorted set
    /// if missing and coerces an entry of the wrong type, then applies the
    /// pairs left to right.
    #[tracing::instrument(skip_all)]
    fn zadd(&mut self, args: &[Vec<u8>]) -> Result<Reply, ServerError> {
        let key = &args[1];
        let pairs = &args[2..];
        if pairs.len() % 2 != 0 {
            return Err(ServerError::UnpairedScoreMember);
        }
        let hash = hash_bytes(key);
        let wrong_type = self
            .keyspace
            .lookup(hash, |e| e.key == *key)
            .map(|e| !matches!(e.value, Value::Zset(_)));
        match wrong_type {
            Some(true) => {
                self.keyspace.remove(hash, |e| e.key == *key);
                self.insert_empty_zset(hash, key);
            }
            None => self.insert_empty_zset(hash, key),
            Some(false) => {}
        }
        let mut added = 0i64;
        if let Some(Entry {
            value: Value::Zset(set),
            ..
        }) = self.keyspace.lookup_mut(hash, |e| e.key == *key)
        {
            for pair in pairs.chunks_exact(2) {
                let score = parse_score(&pair[0])?;
                if set.add(&pair[1], score) {
                    added += 1;
                }
            }
        }
        Ok(Reply::Int(added))
    }

    /// ZSCORE key member
    #[tracing::instrument(skip_all)]
    fn zscore(&mut self, key: &[u8], member: &[u8]) -> Result<Reply, ServerError> {
        match self.keyspace.lookup_mut(hash_bytes(key), |e| e.key == key) {
            None => Ok(Reply::Nil),
            Some(Entry {
                value: Value::Zset(set),
                ..
            }) => Ok(set.score(member).map(Reply::Dbl).unwrap_or(Reply::Nil)),
            Some(_) => Err(ServerError::ExpectingZsetType),
        }
    }

    /// ZRANGE key start stop [WITHSCORES]
    #[tracing::instrument(skip_all)]
    fn zrange(&mut self, args: &[Vec<u8>]) -> Result<Reply, ServerError> {
        let key = &args[1];
        let start = parse_index(&args[2])?;
        let stop = parse_index(&args[3])?;
        let with_scores = args
            .get(4)
            .is_some_and(|arg| arg.eq_ignore_ascii_case(b"WITHSCORES"));
        match self.keyspace.lookup(hash_bytes(key), |e| e.key == *key) {
            None => Ok(Reply::Arr(Vec::new())),
            Some(Entry {
                value: Value::Zset(set),
                ..
            }) => {
                let members = set.range(start, stop);
                let mut items = Vec::with_capacity(if with_scores {
                    members.len() * 2
                } else {
                    members.len()
                });
                for (name, score) in members {
                    items.push(Reply::Str(name.to_vec()));
                    if with_scores {
                        items.push(Reply::Dbl(score));
                    }
                }
                Ok(Reply::Arr(items))
            }
            Some(_) => Err(ServerError::ExpectingZsetType),
        }
    }

    fn insert_empty_zset(&mut self, hash: u64, key: &[u8]) {
        self.keyspace.insert(
            hash,
            Entry {
                key: key.to_vec(),
                value: Value::Zset(SortedSet::new()),
            },
        );
    }
}

fn parse_score(bytes: &[u8]) -> Result<f64, ServerError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or(ServerError::InvalidFloat)
}

fn parse_index(bytes: &[u8]) -> Result<i64, ServerError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ServerError::InvalidInteger)
}
