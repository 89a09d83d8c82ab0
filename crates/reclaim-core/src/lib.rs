use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

/// Failure taxonomy shared by every component that operates on the
/// lost-and-found catalog.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ReclaimError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("notify error: {0}")]
    Notify(String),
}

impl ReclaimError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InconsistentState(_) => "inconsistent_state",
            Self::Validation(_) => "validation",
            Self::Store(_) => "store",
            Self::Notify(_) => "notify",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ItemKey(pub Ulid);

impl ItemKey {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Ulid::from_string(value).ok().map(Self)
    }
}

impl Default for ItemKey {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ItemKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MatchKey(pub Ulid);

impl MatchKey {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Ulid::from_string(value).ok().map(Self)
    }
}

impl Default for MatchKey {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MatchKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_sequential(prefix: char, value: &str) -> Option<u32> {
    let digits = value.strip_prefix(prefix)?;
    if digits.len() < 4 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Human-readable sequential id for lost items, rendered as `L0001`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LostId(pub u32);

impl LostId {
    pub const PREFIX: char = 'L';

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        parse_sequential(Self::PREFIX, value).map(Self)
    }
}

impl Display for LostId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:04}", Self::PREFIX, self.0)
    }
}

impl Serialize for LostId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LostId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).ok_or_else(|| D::Error::custom(format!("invalid lost item id: {value}")))
    }
}

/// Human-readable sequential id for found items, rendered as `F0001`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FoundId(pub u32);

impl FoundId {
    pub const PREFIX: char = 'F';

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        parse_sequential(Self::PREFIX, value).map(Self)
    }
}

impl Display for FoundId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:04}", Self::PREFIX, self.0)
    }
}

impl Serialize for FoundId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FoundId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid found item id: {value}")))
    }
}

/// Human-readable sequential id for match records, rendered as `M0001`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MatchId(pub u32);

impl MatchId {
    pub const PREFIX: char = 'M';

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        parse_sequential(Self::PREFIX, value).map(Self)
    }
}

impl Display for MatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:04}", Self::PREFIX, self.0)
    }
}

impl Serialize for MatchId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MatchId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).ok_or_else(|| D::Error::custom(format!("invalid match id: {value}")))
    }
}

/// Fixed category list shared by every surface. Matching requires exact
/// equality on this enum; free-text categories are not accepted anywhere.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PersonalBelongings,
    Electronics,
    SchoolSupplies,
    TumblersFoodContainers,
    ClothingApparel,
    MoneyValuables,
    Documents,
    Other,
}

impl Category {
    pub const ALL: [Self; 8] = [
        Self::PersonalBelongings,
        Self::Electronics,
        Self::SchoolSupplies,
        Self::TumblersFoodContainers,
        Self::ClothingApparel,
        Self::MoneyValuables,
        Self::Documents,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersonalBelongings => "personal_belongings",
            Self::Electronics => "electronics",
            Self::SchoolSupplies => "school_supplies",
            Self::TumblersFoodContainers => "tumblers_food_containers",
            Self::ClothingApparel => "clothing_apparel",
            Self::MoneyValuables => "money_valuables",
            Self::Documents => "documents",
            Self::Other => "other",
        }
    }

    /// Form label shown to students and staff.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::PersonalBelongings => "Personal Belongings",
            Self::Electronics => "Electronics",
            Self::SchoolSupplies => "School Supplies & Stationery",
            Self::TumblersFoodContainers => "Tumblers & Food Containers",
            Self::ClothingApparel => "Clothing & Apparel",
            Self::MoneyValuables => "Money & Valuables",
            Self::Documents => "Documents",
            Self::Other => "Other",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personal_belongings" => Some(Self::PersonalBelongings),
            "electronics" => Some(Self::Electronics),
            "school_supplies" => Some(Self::SchoolSupplies),
            "tumblers_food_containers" => Some(Self::TumblersFoodContainers),
            "clothing_apparel" => Some(Self::ClothingApparel),
            "money_valuables" => Some(Self::MoneyValuables),
            "documents" => Some(Self::Documents),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Matched,
    Claimed,
}

impl ItemStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Claimed => "claimed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "matched" => Some(Self::Matched),
            "claimed" => Some(Self::Claimed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Lost,
    Found,
}

impl ItemKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lost => "lost",
            Self::Found => "found",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "lost" => Some(Self::Lost),
            "found" => Some(Self::Found),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LostItem {
    pub key: ItemKey,
    pub lost_id: LostId,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub location: String,
    pub date_lost: Date,
    pub notify_email: Option<String>,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FoundItem {
    pub key: ItemKey,
    pub found_id: FoundId,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub location_found: String,
    pub date_found: Date,
    pub department: String,
    pub status: ItemStatus,
}

fn require_field(value: &str, field: &str) -> Result<(), ReclaimError> {
    if value.trim().is_empty() {
        return Err(ReclaimError::Validation(format!("{field} must be non-empty")));
    }
    Ok(())
}

/// Submission payload for a lost-item report. The store assigns the key,
/// sequential id, and Pending status; a missing date defaults to today (UTC).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LostItemDraft {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub location: String,
    pub date_lost: Option<Date>,
    pub notify_email: Option<String>,
}

impl LostItemDraft {
    /// # Errors
    /// Returns [`ReclaimError::Validation`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ReclaimError> {
        require_field(&self.name, "name")?;
        require_field(&self.description, "description")?;
        require_field(&self.location, "location")?;
        Ok(())
    }
}

/// Submission payload for a found-item report logged by staff.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FoundItemDraft {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub location_found: String,
    pub date_found: Option<Date>,
    pub department: Option<String>,
}

impl FoundItemDraft {
    pub const DEFAULT_DEPARTMENT: &'static str = "SHS";

    /// # Errors
    /// Returns [`ReclaimError::Validation`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ReclaimError> {
        require_field(&self.name, "name")?;
        require_field(&self.description, "description")?;
        require_field(&self.location_found, "location_found")?;
        Ok(())
    }
}

/// Owner edit of an existing lost-item report. `None` fields are left as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct LostItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub location: Option<String>,
    pub notify_email: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MatchRecord {
    pub key: MatchKey,
    pub match_id: MatchId,
    pub lost_key: ItemKey,
    pub lost_id: LostId,
    pub found_key: ItemKey,
    pub found_id: FoundId,
    pub lost_snapshot: LostItem,
    pub found_snapshot: FoundItem,
    #[serde(with = "time::serde::rfc3339")]
    pub matched_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Claimant {
    pub id: String,
    pub name: String,
}

impl Claimant {
    /// # Errors
    /// Returns [`ReclaimError::Validation`] when the claimant id or name is empty.
    pub fn validate(&self) -> Result<(), ReclaimError> {
        require_field(&self.id, "claimed_by_id")?;
        require_field(&self.name, "claimed_by_name")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "item", rename_all = "snake_case")]
pub enum ArchivedItem {
    Lost(LostItem),
    Found(FoundItem),
}

impl ArchivedItem {
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Lost(_) => ItemKind::Lost,
            Self::Found(_) => ItemKind::Found,
        }
    }

    #[must_use]
    pub fn key(&self) -> ItemKey {
        match self {
            Self::Lost(item) => item.key,
            Self::Found(item) => item.key,
        }
    }

    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::Lost(item) => item.category,
            Self::Found(item) => item.category,
        }
    }
}

/// Terminal record of a claimed item. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ArchiveEntry {
    #[serde(flatten)]
    pub item: ArchivedItem,
    pub claimed_by_id: String,
    pub claimed_by_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub archived_at: OffsetDateTime,
}

impl ArchiveEntry {
    #[must_use]
    pub fn key(&self) -> ItemKey {
        self.item.key()
    }
}

/// Outcome of evaluating one (lost, found) pair, reporting the first failed
/// guard. Guards run in a fixed order so the reported reason is stable.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MatchEligibility {
    Candidate,
    MissingDescription,
    NotPending,
    CategoryMismatch,
    FoundBeforeLost,
    NoSharedTokens,
}

impl MatchEligibility {
    #[must_use]
    pub fn is_candidate(self) -> bool {
        self == Self::Candidate
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::MissingDescription => "missing_description",
            Self::NotPending => "not_pending",
            Self::CategoryMismatch => "category_mismatch",
            Self::FoundBeforeLost => "found_before_lost",
            Self::NoSharedTokens => "no_shared_tokens",
        }
    }
}

/// Lowercased whitespace-separated token set of a description. Duplicates
/// collapse; ordering is irrelevant to the overlap test.
#[must_use]
pub fn description_tokens(text: &str) -> BTreeSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Decide whether a (lost, found) pair is a candidate match.
///
/// The rule is a boolean gate, not a similarity score: both items must be
/// Pending, share a category, satisfy found-date >= lost-date, and share at
/// least one description token. An empty description is a data error and
/// yields [`MatchEligibility::MissingDescription`] rather than a panic or an
/// error value.
#[must_use]
pub fn evaluate_pair(lost: &LostItem, found: &FoundItem) -> MatchEligibility {
    if lost.description.trim().is_empty() || found.description.trim().is_empty() {
        return MatchEligibility::MissingDescription;
    }
    if lost.status != ItemStatus::Pending || found.status != ItemStatus::Pending {
        return MatchEligibility::NotPending;
    }
    if lost.category != found.category {
        return MatchEligibility::CategoryMismatch;
    }
    if found.date_found < lost.date_lost {
        return MatchEligibility::FoundBeforeLost;
    }

    let lost_tokens = description_tokens(&lost.description);
    let found_tokens = description_tokens(&found.description);
    if lost_tokens.intersection(&found_tokens).next().is_none() {
        return MatchEligibility::NoSharedTokens;
    }

    MatchEligibility::Candidate
}

#[must_use]
pub fn is_candidate_match(lost: &LostItem, found: &FoundItem) -> bool {
    evaluate_pair(lost, found).is_candidate()
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PlannedPair {
    pub lost_key: ItemKey,
    pub found_key: ItemKey,
}

/// Result of one pure reconciliation planning pass.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MatchPlan {
    pub candidates: Vec<PlannedPair>,
    /// Items excluded from matching because their description is empty.
    /// Surfaced so the orchestrator can log the data error once per item.
    pub missing_descriptions: Vec<(ItemKind, ItemKey)>,
}

/// Walk the lost x found cross product in input order and select candidate
/// pairs. One item is selected at most once per pass: the first examined
/// pair wins, and later pairs touching either item are skipped.
#[must_use]
pub fn plan_matches(lost_items: &[LostItem], found_items: &[FoundItem]) -> MatchPlan {
    let mut missing_descriptions = Vec::new();
    for item in lost_items {
        if item.description.trim().is_empty() {
            missing_descriptions.push((ItemKind::Lost, item.key));
        }
    }
    for item in found_items {
        if item.description.trim().is_empty() {
            missing_descriptions.push((ItemKind::Found, item.key));
        }
    }

    let mut taken_found: BTreeSet<ItemKey> = BTreeSet::new();
    let mut candidates = Vec::new();
    for lost in lost_items {
        for found in found_items {
            if taken_found.contains(&found.key) {
                continue;
            }
            if evaluate_pair(lost, found).is_candidate() {
                candidates.push(PlannedPair { lost_key: lost.key, found_key: found.key });
                taken_found.insert(found.key);
                break;
            }
        }
    }

    MatchPlan { candidates, missing_descriptions }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::Month;

    use super::*;

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day)
            .unwrap_or_else(|err| panic!("invalid fixture date: {err}"))
    }

    fn mk_lost(description: &str, category: Category) -> LostItem {
        LostItem {
            key: ItemKey::new(),
            lost_id: LostId(1),
            name: "fixture".to_string(),
            description: description.to_string(),
            category,
            location: "3rd Floor".to_string(),
            date_lost: date(2025, Month::March, 3),
            notify_email: None,
            status: ItemStatus::Pending,
        }
    }

    fn mk_found(description: &str, category: Category) -> FoundItem {
        FoundItem {
            key: ItemKey::new(),
            found_id: FoundId(1),
            name: "fixture".to_string(),
            description: description.to_string(),
            category,
            location_found: "6th Floor (Library)".to_string(),
            date_found: date(2025, Month::March, 5),
            department: "SHS".to_string(),
            status: ItemStatus::Pending,
        }
    }

    #[test]
    fn tokens_lowercase_and_collapse_duplicates() {
        let tokens = description_tokens("Black BLACK  wireless   Mouse mouse");
        let expected: BTreeSet<String> =
            ["black", "wireless", "mouse"].iter().map(|s| (*s).to_string()).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn overlapping_descriptions_in_same_category_are_candidates() {
        let lost = mk_lost("black wireless mouse", Category::Electronics);
        let found = mk_found("wireless mouse black color", Category::Electronics);
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::Candidate);
        assert!(is_candidate_match(&lost, &found));
    }

    #[test]
    fn category_mismatch_beats_full_text_overlap() {
        let lost = mk_lost("blue notebook", Category::Documents);
        let found = mk_found("blue notebook", Category::Electronics);
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::CategoryMismatch);
    }

    #[test]
    fn empty_description_is_a_data_error_not_a_match() {
        let lost = mk_lost("   ", Category::Electronics);
        let found = mk_found("wireless mouse", Category::Electronics);
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::MissingDescription);
    }

    #[test]
    fn non_pending_items_are_not_eligible() {
        let mut lost = mk_lost("black mouse", Category::Electronics);
        let found = mk_found("black mouse", Category::Electronics);
        lost.status = ItemStatus::Matched;
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::NotPending);

        let lost = mk_lost("black mouse", Category::Electronics);
        let mut found = mk_found("black mouse", Category::Electronics);
        found.status = ItemStatus::Claimed;
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::NotPending);
    }

    #[test]
    fn item_found_before_it_was_lost_is_rejected() {
        let mut lost = mk_lost("black mouse", Category::Electronics);
        let found = mk_found("black mouse", Category::Electronics);
        lost.date_lost = date(2025, Month::March, 9);
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::FoundBeforeLost);
    }

    #[test]
    fn found_on_the_same_day_is_accepted() {
        let mut lost = mk_lost("black mouse", Category::Electronics);
        let found = mk_found("black mouse", Category::Electronics);
        lost.date_lost = found.date_found;
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::Candidate);
    }

    #[test]
    fn disjoint_descriptions_share_no_tokens() {
        let lost = mk_lost("red umbrella", Category::PersonalBelongings);
        let found = mk_found("green jacket", Category::PersonalBelongings);
        assert_eq!(evaluate_pair(&lost, &found), MatchEligibility::NoSharedTokens);
    }

    #[test]
    fn plan_selects_each_item_at_most_once() {
        let lost_a = mk_lost("black mouse", Category::Electronics);
        let lost_b = mk_lost("black mouse", Category::Electronics);
        let found = mk_found("black mouse", Category::Electronics);

        let plan = plan_matches(&[lost_a.clone(), lost_b.clone()], &[found.clone()]);
        assert_eq!(
            plan.candidates,
            vec![PlannedPair { lost_key: lost_a.key, found_key: found.key }]
        );
    }

    #[test]
    fn plan_first_examined_pair_wins_and_later_items_take_the_next_found() {
        let lost_a = mk_lost("black mouse", Category::Electronics);
        let lost_b = mk_lost("black charger", Category::Electronics);
        let found_a = mk_found("black mouse and charger", Category::Electronics);
        let found_b = mk_found("black charger", Category::Electronics);

        let plan = plan_matches(
            &[lost_a.clone(), lost_b.clone()],
            &[found_a.clone(), found_b.clone()],
        );
        assert_eq!(
            plan.candidates,
            vec![
                PlannedPair { lost_key: lost_a.key, found_key: found_a.key },
                PlannedPair { lost_key: lost_b.key, found_key: found_b.key },
            ]
        );
    }

    #[test]
    fn plan_reports_empty_descriptions_once_per_item() {
        let lost = mk_lost("", Category::Electronics);
        let found_a = mk_found("black mouse", Category::Electronics);
        let found_b = mk_found(" ", Category::Electronics);

        let plan = plan_matches(&[lost.clone()], &[found_a, found_b.clone()]);
        assert!(plan.candidates.is_empty());
        assert_eq!(
            plan.missing_descriptions,
            vec![(ItemKind::Lost, lost.key), (ItemKind::Found, found_b.key)]
        );
    }

    #[test]
    fn sequential_ids_render_and_parse() {
        assert_eq!(LostId(1).to_string(), "L0001");
        assert_eq!(FoundId(42).to_string(), "F0042");
        assert_eq!(MatchId(12345).to_string(), "M12345");
        assert_eq!(LostId::parse("L0042"), Some(LostId(42)));
        assert_eq!(MatchId::parse("M12345"), Some(MatchId(12345)));
        assert_eq!(LostId::parse("F0042"), None);
        assert_eq!(LostId::parse("L42"), None);
        assert_eq!(LostId::parse("L00x2"), None);
    }

    #[test]
    fn sequential_ids_serialize_as_rendered_strings() {
        let raw = serde_json::to_string(&LostId(7))
            .unwrap_or_else(|err| panic!("serialize failed: {err}"));
        assert_eq!(raw, "\"L0007\"");
        let parsed: LostId = serde_json::from_str("\"L0007\"")
            .unwrap_or_else(|err| panic!("deserialize failed: {err}"));
        assert_eq!(parsed, LostId(7));
        assert!(serde_json::from_str::<LostId>("\"M0007\"").is_err());
    }

    #[test]
    fn category_round_trips_and_exposes_form_labels() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
            assert!(!category.label().is_empty());
        }
        assert_eq!(Category::parse("stationery"), None);
        assert_eq!(Category::SchoolSupplies.label(), "School Supplies & Stationery");
    }

    #[test]
    fn status_and_kind_round_trip() {
        for status in [ItemStatus::Pending, ItemStatus::Matched, ItemStatus::Claimed] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        for kind in [ItemKind::Lost, ItemKind::Found] {
            assert_eq!(ItemKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ItemStatus::parse("archived"), None);
    }

    #[test]
    fn draft_validation_requires_core_fields() {
        let draft = LostItemDraft {
            name: String::new(),
            description: "black mouse".to_string(),
            category: Category::Electronics,
            location: "3rd Floor".to_string(),
            date_lost: None,
            notify_email: None,
        };
        let err = match draft.validate() {
            Ok(()) => panic!("expected validation failure"),
            Err(err) => err,
        };
        assert_eq!(err, ReclaimError::Validation("name must be non-empty".to_string()));
        assert_eq!(err.kind(), "validation");
    }

    fn token_set(prefix: &str, picks: &[u8]) -> String {
        picks
            .iter()
            .map(|pick| format!("{prefix}{pick}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    proptest! {
        #[test]
        fn disjoint_token_sets_never_match(
            lost_picks in prop::collection::vec(0u8..50, 1..8),
            found_picks in prop::collection::vec(0u8..50, 1..8),
        ) {
            let lost = mk_lost(&token_set("a", &lost_picks), Category::Other);
            let found = mk_found(&token_set("b", &found_picks), Category::Other);
            prop_assert!(!is_candidate_match(&lost, &found));
        }

        #[test]
        fn shared_token_with_all_guards_satisfied_always_matches(
            lost_picks in prop::collection::vec(0u8..50, 0..8),
            found_picks in prop::collection::vec(0u8..50, 0..8),
        ) {
            let lost_desc = format!("shared {}", token_set("a", &lost_picks));
            let found_desc = format!("{} SHARED", token_set("b", &found_picks));
            let lost = mk_lost(&lost_desc, Category::Documents);
            let found = mk_found(&found_desc, Category::Documents);
            prop_assert!(is_candidate_match(&lost, &found));
        }
    }
}
