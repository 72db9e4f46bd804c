use crate::collection::Document;
use crate::common::{retry_transient, unix_now, Convertible, RetryPolicy, Value, DOC_ID};
use crate::context::Context;
use crate::errors::{BizError, BizResult, ErrorKind};
use crate::sequence::{validate_namespace, SequenceAllocator};
use crate::store::{by_id, field, update_only, Filter, FindOptions, StoreGateway, Update};

const FIELD_USER_NAME: &str = "user_name";
const FIELD_PASSWORD: &str = "password";
const FIELD_CREATE_AT: &str = "create_at";
const FIELD_EX_DATA: &str = "ex_data";

/// A password account. `id` comes from the sequence allocator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    pub id: u64,
    pub user_name: String,
    pub password: String,
    pub create_at: i64,
    pub ex_data: Document,
}

impl Convertible for User {
    type Output = User;

    fn to_value(&self) -> BizResult<Value> {
        let mut doc = Document::new();
        doc.put(DOC_ID, self.id)?;
        doc.put(FIELD_USER_NAME, self.user_name.as_str())?;
        doc.put(FIELD_PASSWORD, self.password.as_str())?;
        doc.put(FIELD_CREATE_AT, self.create_at)?;
        if !self.ex_data.is_empty() {
            doc.put(FIELD_EX_DATA, self.ex_data.clone())?;
        }
        Ok(Value::Document(doc))
    }

    fn from_value(value: &Value) -> BizResult<User> {
        let doc = Document::from_value(value)?;
        Ok(User {
            id: doc.get_as::<u64>(DOC_ID)?,
            user_name: doc.get_as::<String>(FIELD_USER_NAME)?,
            password: doc.get_as::<String>(FIELD_PASSWORD)?,
            create_at: doc.get_as::<i64>(FIELD_CREATE_AT)?,
            ex_data: doc.get_as::<Document>(FIELD_EX_DATA)?,
        })
    }
}

/// User accounts keyed by allocator-issued ids.
///
/// The collection name doubles as the allocator namespace, so the counter
/// for collection `users` is the record `{_id: "users"}` in the counter
/// collection. An id taken by an insert that then fails (for instance on a
/// duplicate user name) is not handed back: ids are unique, not gap-free.
#[derive(Clone)]
pub struct UserRepository {
    gateway: StoreGateway,
    allocator: SequenceAllocator,
    collection: String,
    retry_policy: RetryPolicy,
}

impl UserRepository {
    /// Opens the repository over `collection` and makes sure `user_name`
    /// is uniquely indexed. A failure to create the index is logged and
    /// tolerated.
    pub fn open(
        ctx: &Context,
        allocator: SequenceAllocator,
        collection: &str,
        retry_policy: RetryPolicy,
    ) -> BizResult<UserRepository> {
        validate_namespace(collection)?;
        let gateway = allocator.gateway().clone();
        if let Err(err) = gateway.create_unique_index(ctx, collection, FIELD_USER_NAME) {
            log::error!(
                "Failed to create unique index on {}.{}: {}",
                collection,
                FIELD_USER_NAME,
                err
            );
        }

        Ok(UserRepository {
            gateway,
            allocator,
            collection: collection.to_string(),
            retry_policy,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Allocates an id and stores the user under it.
    pub fn add_user(&self, ctx: &Context, user_name: &str, password: &str) -> BizResult<User> {
        let id = retry_transient(&self.retry_policy, ctx, || {
            self.allocator.next(ctx, &self.collection)
        })?;

        let user = User {
            id,
            user_name: user_name.to_string(),
            password: password.to_string(),
            create_at: unix_now(),
            ex_data: Document::new(),
        };
        let document = Document::from_value(&user.to_value()?)?;
        self.gateway.insert_one(ctx, &self.collection, document).map_err(|err| {
            log::warn!("User id {} is burnt: insert failed: {}", id, err);
            err
        })?;
        Ok(user)
    }

    /// Deletes the user if present. Deleting a missing user is not an error.
    pub fn delete_user(&self, ctx: &Context, user_id: u64) -> BizResult<()> {
        let deleted = self.gateway.delete_one(ctx, &self.collection, &by_id(user_id))?;
        if deleted == 0 {
            log::debug!("User {} not found for deletion", user_id);
        }
        Ok(())
    }

    pub fn get_user(&self, ctx: &Context, user_id: u64) -> BizResult<User> {
        self.find_user(ctx, &by_id(user_id), &user_id.to_string())
    }

    pub fn get_user_by_user_name(&self, ctx: &Context, user_name: &str) -> BizResult<User> {
        self.find_user(ctx, &field(FIELD_USER_NAME).eq(user_name), user_name)
    }

    pub fn list_users(&self, ctx: &Context) -> BizResult<Vec<User>> {
        self.gateway
            .find(ctx, &self.collection, &Filter::All, &FindOptions::new())?
            .into_iter()
            .map(|doc| User::from_value(&Value::Document(doc)))
            .collect()
    }

    /// Sets one key of the user's `ex_data`, keeping the others.
    ///
    /// The merge happens in memory between a read and a `$set`, so two
    /// concurrent calls on the same user may lose one of the keys.
    pub fn update_user_ex_data<T: Into<Value>>(
        &self,
        ctx: &Context,
        user_id: u64,
        key: &str,
        value: T,
    ) -> BizResult<()> {
        let user = self.get_user(ctx, user_id)?;
        let mut ex_data = user.ex_data;
        ex_data.put(key, value)?;
        self.set_ex_data(ctx, user_id, ex_data)
    }

    /// Replaces the user's whole `ex_data`.
    pub fn update_user_all_ex_data(&self, ctx: &Context, user_id: u64, ex_data: Document) -> BizResult<()> {
        self.set_ex_data(ctx, user_id, ex_data)
    }

    fn set_ex_data(&self, ctx: &Context, user_id: u64, ex_data: Document) -> BizResult<()> {
        let updated = self.gateway.find_one_and_update(
            ctx,
            &self.collection,
            &by_id(user_id),
            &Update::new().set(FIELD_EX_DATA, ex_data),
            &update_only(),
        )?;
        if updated.is_none() {
            return Err(not_found(&user_id.to_string()));
        }
        Ok(())
    }

    fn find_user(&self, ctx: &Context, filter: &Filter, what: &str) -> BizResult<User> {
        match self.gateway.find_one(ctx, &self.collection, filter)? {
            Some(doc) => User::from_value(&Value::Document(doc)),
            None => Err(not_found(what)),
        }
    }
}

fn not_found(what: &str) -> BizError {
    log::error!("User {} not found", what);
    BizError::new(&format!("User {} not found", what), ErrorKind::NotFound)
}
