use crate::collection::{Document, ObjectId};
use crate::common::{Convertible, Value, DOC_ID, TALK_INFO_COLLECTION, TALK_MESSAGE_COLLECTION_PREFIX};
use crate::context::Context;
use crate::errors::{BizError, BizResult, ErrorKind};
use crate::store::{and, by_id, field, update_only, Filter, FindOptions, StoreGateway, Update};

const FIELD_STATUS: &str = "Status";
const FIELD_TITLE: &str = "Title";
const FIELD_START_AT: &str = "StartAt";
const FIELD_FINISHED_AT: &str = "FinishedAt";
const FIELD_CREATOR_ID: &str = "CreatorID";
const FIELD_SERVICE_ID: &str = "ServiceID";
const FIELD_AT: &str = "At";
const FIELD_TYPE: &str = "Type";
const FIELD_TEXT: &str = "Text";
const FIELD_DATA: &str = "Data";

/// Lifecycle state of a talk. Stored as its integer code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TalkStatus {
    #[default]
    Unknown,
    Opened,
    Closed,
}

impl TalkStatus {
    pub fn code(&self) -> i64 {
        match self {
            TalkStatus::Unknown => 0,
            TalkStatus::Opened => 1,
            TalkStatus::Closed => 2,
        }
    }

    /// Unrecognized codes read back as `Unknown`.
    pub fn from_code(code: i64) -> TalkStatus {
        match code {
            1 => TalkStatus::Opened,
            2 => TalkStatus::Closed,
            _ => TalkStatus::Unknown,
        }
    }
}

impl From<TalkStatus> for Value {
    fn from(status: TalkStatus) -> Self {
        Value::I64(status.code())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TalkMessageType {
    #[default]
    Unknown,
    Text,
    Image,
}

impl TalkMessageType {
    pub fn code(&self) -> i64 {
        match self {
            TalkMessageType::Unknown => 0,
            TalkMessageType::Text => 1,
            TalkMessageType::Image => 2,
        }
    }

    pub fn from_code(code: i64) -> TalkMessageType {
        match code {
            1 => TalkMessageType::Text,
            2 => TalkMessageType::Image,
            _ => TalkMessageType::Unknown,
        }
    }
}

/// Header of a talk, stored in `talk_info`.
///
/// `talk_id` is assigned by the store; it is ignored by `create_talk` and
/// filled in on every read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TalkInfo {
    pub talk_id: String,
    pub status: TalkStatus,
    pub title: String,
    pub start_at: i64,
    pub finished_at: i64,
    pub creator_id: u64,
    pub service_id: u64,
}

impl Convertible for TalkInfo {
    type Output = TalkInfo;

    fn to_value(&self) -> BizResult<Value> {
        let mut doc = Document::new();
        doc.put(FIELD_STATUS, self.status)?;
        doc.put(FIELD_TITLE, self.title.as_str())?;
        doc.put(FIELD_START_AT, self.start_at)?;
        doc.put(FIELD_FINISHED_AT, self.finished_at)?;
        doc.put(FIELD_CREATOR_ID, self.creator_id)?;
        doc.put(FIELD_SERVICE_ID, self.service_id)?;
        Ok(Value::Document(doc))
    }

    fn from_value(value: &Value) -> BizResult<TalkInfo> {
        let doc = Document::from_value(value)?;
        Ok(TalkInfo {
            talk_id: doc.get_as::<ObjectId>(DOC_ID)?.to_hex(),
            status: TalkStatus::from_code(optional_i64(&doc, FIELD_STATUS)?),
            title: optional_string(&doc, FIELD_TITLE)?,
            start_at: optional_i64(&doc, FIELD_START_AT)?,
            finished_at: optional_i64(&doc, FIELD_FINISHED_AT)?,
            creator_id: optional_u64(&doc, FIELD_CREATOR_ID)?,
            service_id: optional_u64(&doc, FIELD_SERVICE_ID)?,
        })
    }
}

/// One message of a talk, stored in `talk:<talk id>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TalkMessage {
    pub message_id: String,
    pub at: i64,
    pub creator_id: u64,
    pub message_type: TalkMessageType,
    pub text: String,
    pub data: Vec<u8>,
}

impl Convertible for TalkMessage {
    type Output = TalkMessage;

    fn to_value(&self) -> BizResult<Value> {
        let mut doc = Document::new();
        doc.put(FIELD_AT, self.at)?;
        doc.put(FIELD_CREATOR_ID, self.creator_id)?;
        doc.put(FIELD_TYPE, self.message_type.code())?;
        doc.put(FIELD_TEXT, self.text.as_str())?;
        doc.put(FIELD_DATA, self.data.clone())?;
        Ok(Value::Document(doc))
    }

    fn from_value(value: &Value) -> BizResult<TalkMessage> {
        let doc = Document::from_value(value)?;
        Ok(TalkMessage {
            message_id: doc.get_as::<ObjectId>(DOC_ID)?.to_hex(),
            at: optional_i64(&doc, FIELD_AT)?,
            creator_id: optional_u64(&doc, FIELD_CREATOR_ID)?,
            message_type: TalkMessageType::from_code(optional_i64(&doc, FIELD_TYPE)?),
            text: optional_string(&doc, FIELD_TEXT)?,
            data: doc.get_as::<Vec<u8>>(FIELD_DATA)?,
        })
    }
}

/// Criteria of [TalkRepository::query_talks]. Zero ids, an empty talk id
/// and an empty status list mean "any".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TalkQuery {
    pub creator_id: u64,
    pub service_id: u64,
    pub talk_id: String,
    pub statuses: Vec<TalkStatus>,
}

impl TalkQuery {
    fn to_filter(&self) -> BizResult<Filter> {
        let mut filters = Vec::new();
        if self.creator_id > 0 {
            filters.push(field(FIELD_CREATOR_ID).eq(self.creator_id));
        }
        if self.service_id > 0 {
            filters.push(field(FIELD_SERVICE_ID).eq(self.service_id));
        }
        if !self.statuses.is_empty() {
            filters.push(field(FIELD_STATUS).is_in(self.statuses.clone()));
        }
        if !self.talk_id.is_empty() {
            filters.push(by_id(ObjectId::parse(&self.talk_id)?));
        }
        Ok(and(filters))
    }
}

/// Talks and their messages. Talks are keyed by store-assigned object ids;
/// nothing here touches the sequence allocator.
#[derive(Clone)]
pub struct TalkRepository {
    gateway: StoreGateway,
}

impl TalkRepository {
    pub fn new(gateway: StoreGateway) -> TalkRepository {
        TalkRepository { gateway }
    }

    /// Stores a new talk and returns its id as 24 hex characters.
    pub fn create_talk(&self, ctx: &Context, talk: &TalkInfo) -> BizResult<String> {
        let document = Document::from_value(&talk.to_value()?)?;
        let id = self.gateway.insert_one(ctx, TALK_INFO_COLLECTION, document)?;
        match id.as_object_id() {
            Some(id) => Ok(id.to_hex()),
            None => {
                log::error!("Talk was stored with a non object id {:?}", id);
                Err(BizError::new(
                    "Talk was stored with a non object id",
                    ErrorKind::InternalError,
                ))
            }
        }
    }

    pub fn open_talk(&self, ctx: &Context, talk_id: &str) -> BizResult<()> {
        self.update_talk(ctx, talk_id, Update::new().set(FIELD_STATUS, TalkStatus::Opened))
    }

    pub fn close_talk(&self, ctx: &Context, talk_id: &str) -> BizResult<()> {
        self.update_talk(ctx, talk_id, Update::new().set(FIELD_STATUS, TalkStatus::Closed))
    }

    pub fn update_talk_service_id(&self, ctx: &Context, talk_id: &str, service_id: u64) -> BizResult<()> {
        self.update_talk(ctx, talk_id, Update::new().set(FIELD_SERVICE_ID, service_id))
    }

    pub fn add_talk_message(&self, ctx: &Context, talk_id: &str, message: &TalkMessage) -> BizResult<()> {
        let collection = message_collection(talk_id)?;
        let document = Document::from_value(&message.to_value()?)?;
        self.gateway.insert_one(ctx, &collection, document)?;
        Ok(())
    }

    /// Messages of a talk in insertion order. With `count > 0` returns at
    /// most `count` messages after skipping `offset`; otherwise returns all.
    pub fn get_talk_messages(
        &self,
        ctx: &Context,
        talk_id: &str,
        offset: u64,
        count: u64,
    ) -> BizResult<Vec<TalkMessage>> {
        let collection = message_collection(talk_id)?;
        let options = if count > 0 {
            FindOptions::new().skip(offset).limit(count)
        } else {
            FindOptions::new()
        };

        self.gateway
            .find(ctx, &collection, &Filter::All, &options)?
            .into_iter()
            .map(|doc| TalkMessage::from_value(&Value::Document(doc)))
            .collect()
    }

    pub fn query_talks(&self, ctx: &Context, query: &TalkQuery) -> BizResult<Vec<TalkInfo>> {
        let filter = query.to_filter()?;
        self.find_talks(ctx, &filter)
    }

    /// Opened talks no service has picked up yet.
    pub fn get_pending_talk_infos(&self, ctx: &Context) -> BizResult<Vec<TalkInfo>> {
        let query = TalkQuery {
            statuses: vec![TalkStatus::Opened],
            ..TalkQuery::default()
        };
        let filter = and(vec![query.to_filter()?, field(FIELD_SERVICE_ID).eq(0u64)]);
        self.find_talks(ctx, &filter)
    }

    fn find_talks(&self, ctx: &Context, filter: &Filter) -> BizResult<Vec<TalkInfo>> {
        self.gateway
            .find(ctx, TALK_INFO_COLLECTION, filter, &FindOptions::new())?
            .into_iter()
            .map(|doc| TalkInfo::from_value(&Value::Document(doc)))
            .collect()
    }

    fn update_talk(&self, ctx: &Context, talk_id: &str, update: Update) -> BizResult<()> {
        let id = ObjectId::parse(talk_id)?;
        let updated = self.gateway.find_one_and_update(
            ctx,
            TALK_INFO_COLLECTION,
            &by_id(id),
            &update,
            &update_only(),
        )?;
        if updated.is_none() {
            log::error!("Talk {} not found", talk_id);
            return Err(BizError::new(
                &format!("Talk {} not found", talk_id),
                ErrorKind::NotFound,
            ));
        }
        Ok(())
    }
}

fn message_collection(talk_id: &str) -> BizResult<String> {
    let id = ObjectId::parse(talk_id)?;
    Ok(format!("{}{}", TALK_MESSAGE_COLLECTION_PREFIX, id.to_hex()))
}

fn optional_i64(doc: &Document, key: &str) -> BizResult<i64> {
    match doc.get_ref(key) {
        None | Some(Value::Null) => Ok(0),
        Some(_) => doc.get_as::<i64>(key),
    }
}

fn optional_u64(doc: &Document, key: &str) -> BizResult<u64> {
    match doc.get_ref(key) {
        None | Some(Value::Null) => Ok(0),
        Some(_) => doc.get_as::<u64>(key),
    }
}

fn optional_string(doc: &Document, key: &str) -> BizResult<String> {
    match doc.get_ref(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(_) => doc.get_as::<String>(key),
    }
}
