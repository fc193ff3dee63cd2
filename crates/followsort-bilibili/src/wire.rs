//! JSON shapes of the relation API and the envelope/error-code mapping.

use serde::{de::DeserializeOwned, Deserialize};

use followsort_core::{
    domain::{FollowedEntity, FollowingPage, Group, GroupId, Verification},
    errors::Error,
    Result,
};

/// Every relation endpoint answers `{code, message, data}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct FollowingsData {
    #[serde(default)]
    pub list: Vec<WireUser>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct WireUser {
    pub mid: u64,
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub sign: String,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub official_verify: Option<WireVerify>,
    #[serde(default)]
    pub vip: Option<WireVip>,
    #[serde(default)]
    pub mtime: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WireVerify {
    #[serde(rename = "type", default = "no_verify")]
    pub kind: i32,
    #[serde(default)]
    pub desc: String,
}

fn no_verify() -> i32 {
    -1
}

#[derive(Debug, Deserialize)]
pub struct WireVip {
    #[serde(rename = "vipStatus", default)]
    pub status: i32,
}

#[derive(Debug, Deserialize)]
pub struct WireTag {
    pub tagid: i64,
    pub name: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreatedTag {
    pub tagid: i64,
}

impl From<WireUser> for FollowedEntity {
    fn from(u: WireUser) -> Self {
        let verification = u
            .official_verify
            .map(|v| Verification {
                kind: v.kind,
                description: v.desc,
            })
            .unwrap_or_else(Verification::none);

        let mut entity = FollowedEntity::new(u.mid, u.uname, u.sign);
        entity.avatar = u.face;
        entity.verification = verification;
        entity.vip = u.vip.is_some_and(|v| v.status == 1);
        entity.followed_at = u.mtime.filter(|t| *t > 0);
        entity
    }
}

impl From<WireTag> for Group {
    fn from(t: WireTag) -> Self {
        Group {
            id: GroupId(t.tagid),
            name: t.name,
            member_count: t.count,
        }
    }
}

/// Map a non-zero envelope code to the error taxonomy.
pub fn code_error(code: i64, message: &str) -> Error {
    match code {
        // Risk control, rate limiting and "request too frequent".
        -412 | -509 | -799 => Error::Transient(format!("bilibili throttled ({code}): {message}")),
        // Not logged in / csrf mismatch.
        -101 | -111 => Error::Config(format!("bilibili rejected credentials ({code}): {message}")),
        _ => Error::Platform {
            code,
            message: message.to_string(),
        },
    }
}

/// Parse an envelope body, turning a non-zero code into an error.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<Option<T>> {
    let env: Envelope<T> = serde_json::from_str(body)?;
    if env.code != 0 {
        return Err(code_error(env.code, &env.message));
    }
    Ok(env.data)
}

pub fn following_page(body: &str) -> Result<FollowingPage> {
    let data: FollowingsData = decode(body)?.unwrap_or(FollowingsData {
        list: Vec::new(),
        total: 0,
    });
    Ok(FollowingPage {
        entities: data.list.into_iter().map(FollowedEntity::from).collect(),
        total: data.total,
    })
}

pub fn groups(body: &str) -> Result<Vec<Group>> {
    let tags: Vec<WireTag> = decode(body)?.unwrap_or_default();
    Ok(tags.into_iter().map(Group::from).collect())
}

pub fn created_group(body: &str) -> Result<GroupId> {
    let created: Option<CreatedTag> = decode(body)?;
    match created {
        Some(c) if c.tagid > 0 => Ok(GroupId(c.tagid)),
        _ => Err(Error::Platform {
            code: -1,
            message: "tag/create returned no tagid".to_string(),
        }),
    }
}

pub fn acknowledged(body: &str) -> Result<()> {
    decode::<serde_json::Value>(body)?;
    Ok(())
}
