use std::fmt;

use serde::{Serialize, Serializer};

/// Platform account id of the user whose follow list is sorted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerId(pub u64);

/// Platform id of a followed account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub u64);

/// Platform id of a follow group (a relation tag on Bilibili).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct GroupId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Official verification badge as reported by the platform.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// `-1` when the account carries no badge.
    pub kind: i32,
    pub description: String,
}

impl Verification {
    pub fn none() -> Self {
        Self {
            kind: -1,
            description: String::new(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.kind >= 0 && !self.description.trim().is_empty()
    }
}

/// Snapshot of one followed account, produced by the retriever.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FollowedEntity {
    pub id: EntityId,
    pub name: String,
    pub signature: String,
    pub avatar: String,
    pub verification: Verification,
    pub vip: bool,
    /// Unix seconds; `None` when the platform omits it.
    pub followed_at: Option<i64>,
}

impl FollowedEntity {
    pub fn new(id: u64, name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            id: EntityId(id),
            name: name.into(),
            signature: signature.into(),
            avatar: String::new(),
            verification: Verification::none(),
            vip: false,
            followed_at: None,
        }
    }
}

/// One page of the follow list.
#[derive(Clone, Debug, Default)]
pub struct FollowingPage {
    pub entities: Vec<FollowedEntity>,
    /// Server-reported size of the whole follow list.
    pub total: usize,
}

/// An existing follow group on the platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub member_count: u64,
}

macro_rules! categories {
    ($($variant:ident => $label:literal),+ $(,)?) => {
        /// Closed category vocabulary. `Unknown` is the fallback label and is
        /// never offered to the model.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Category {
            $($variant,)+
            Unknown,
        }

        impl Category {
            /// Every label the model may pick.
            pub const TOPICAL: &'static [Category] = &[$(Category::$variant,)+];

            pub fn label(self) -> &'static str {
                match self {
                    $(Category::$variant => $label,)+
                    Category::Unknown => "未知",
                }
            }
        }
    };
}

categories! {
    Tech => "科技",
    Gaming => "游戏",
    Music => "音乐",
    Dance => "舞蹈",
    Food => "美食",
    Travel => "旅游",
    Fashion => "时尚",
    Beauty => "美妆",
    Education => "教育",
    Knowledge => "知识",
    Finance => "财经",
    Investing => "投资",
    Startups => "创业",
    Career => "职场",
    Lifestyle => "生活",
    Entertainment => "娱乐",
    FilmTv => "影视",
    Anime => "动漫",
    Sports => "体育",
    Fitness => "健身",
    Cars => "汽车",
    Gadgets => "数码",
    Photography => "摄影",
    Art => "艺术",
    Design => "设计",
    Programming => "编程",
    Ai => "AI",
    Science => "科学",
    History => "历史",
    Literature => "文学",
    Psychology => "心理",
    Medicine => "医学",
    Law => "法律",
    News => "新闻",
    CurrentAffairs => "时事",
    Comedy => "搞笑",
    Pets => "萌宠",
    Parenting => "母婴",
    Home => "家居",
    Crafts => "手工",
}

impl Category {
    /// Exact label lookup (surrounding whitespace ignored).
    pub fn from_label(raw: &str) -> Option<Category> {
        let raw = raw.trim();
        if raw == Category::Unknown.label() {
            return Some(Category::Unknown);
        }
        Category::TOPICAL.iter().copied().find(|c| c.label() == raw)
    }

    pub fn is_unknown(self) -> bool {
        self == Category::Unknown
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Classifier verdict for one entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub entity_id: EntityId,
    pub name: String,
    pub signature: String,
    pub category: Category,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub reason: String,
}

impl ClassificationResult {
    pub fn unknown(entity: &FollowedEntity, reason: impl Into<String>) -> Self {
        Self {
            entity_id: entity.id,
            name: entity.name.clone(),
            signature: entity.signature.clone(),
            category: Category::Unknown,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// Progress of moving one category's members into its platform group.
#[derive(Clone, Debug, Serialize)]
pub struct AssignmentTask {
    pub category: Category,
    pub members: Vec<EntityId>,
    pub group_id: Option<GroupId>,
    /// The group was created during this run (as opposed to reused).
    pub created: bool,
    /// Every batch has been attempted, whatever the outcome.
    pub assigned: bool,
    pub succeeded_batches: usize,
    pub failed_batches: usize,
    pub assigned_entities: usize,
    pub failed_entities: usize,
}

impl AssignmentTask {
    pub fn new(category: Category, members: Vec<EntityId>) -> Self {
        Self {
            category,
            members,
            group_id: None,
            created: false,
            assigned: false,
            succeeded_batches: 0,
            failed_batches: 0,
            assigned_entities: 0,
            failed_entities: 0,
        }
    }
}
