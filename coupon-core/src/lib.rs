use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub type DeviceId = String;
pub type CouponCode = String;

/// Device id → day of the last play attempt, as produced by [`day_key`].
pub type Plays = BTreeMap<DeviceId, String>;

/// Format of the day strings stored in [`Plays`], e.g. `Mon Oct 19 2026`.
pub const DAY_FORMAT: &str = "%a %b %d %Y";

/// Recorded as `redeemedBy` when the crew member leaves their name blank.
pub const DEFAULT_REDEEMER: &str = "staff";

pub const VALID_MESSAGE: &str = "Coupon is valid and can be redeemed";
pub const REDEEMED_MESSAGE: &str = "Redeemed successfully!";

pub fn day_key(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: CouponCode,
    #[serde(default, deserialize_with = "null_as_default")]
    pub game_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub claimed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_when_claimed: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub redeemed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Fields written by whoever seeded the inventory; carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `null` reads the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Coupon {
    pub fn new(code: impl Into<String>, game_id: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            code: code.into(),
            game_id: game_id.into(),
            min_score: Some(min),
            max_score: Some(max),
            claimed: false,
            claimed_by: None,
            claimed_at: None,
            score_when_claimed: None,
            redeemed: false,
            redeemed_by: None,
            redeemed_at: None,
            extra: Map::new(),
        }
    }

    /// Inclusive on both ends; a missing bound leaves that side open.
    pub fn accepts_score(&self, score: f64) -> bool {
        self.min_score.map_or(true, |min| score >= min)
            && self.max_score.map_or(true, |max| score <= max)
    }

    pub fn is_claimable(&self, game_id: &str, score: f64) -> bool {
        !self.claimed && self.game_id == game_id && self.accepts_score(score)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    AlreadyPlayedToday,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayCheck {
    pub can_play: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl PlayCheck {
    pub fn allowed() -> Self {
        Self {
            can_play: true,
            reason: None,
        }
    }

    pub fn denied(reason: DenyReason) -> Self {
        Self {
            can_play: false,
            reason: Some(reason),
        }
    }
}

/// An anonymous check (no device id) is always allowed.
pub fn can_play(plays: &Plays, device_id: Option<&str>, today: &str) -> PlayCheck {
    let Some(device_id) = device_id.filter(|id| !id.is_empty()) else {
        return PlayCheck::allowed();
    };
    match plays.get(device_id) {
        Some(last) if last == today => PlayCheck::denied(DenyReason::AlreadyPlayedToday),
        _ => PlayCheck::allowed(),
    }
}

pub fn record_play(plays: &mut Plays, device_id: &str, today: &str) {
    plays.insert(device_id.to_string(), today.to_string());
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Missing required fields")]
    MissingFields,
    #[error("No coupon available for this score.")]
    NoCouponAvailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    pub device_id: DeviceId,
    pub score: f64,
    pub game_id: String,
}

impl ClaimRequest {
    /// Empty strings count as missing; a score of zero does not. Values are
/// taken as sent, without trimming.
    pub fn new(
        device_id: Option<String>,
        score: Option<f64>,
        game_id: Option<String>,
    ) -> Result<Self, ClaimError> {
        match (non_empty(device_id), score, non_empty(game_id)) {
            (Some(device_id), Some(score), Some(game_id)) => Ok(Self {
                device_id,
                score,
                game_id,
            }),
            _ => Err(ClaimError::MissingFields),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Marks the device as played today, then hands out the first claimable coupon
/// in stored order. The play is recorded even when nothing matches.
pub fn claim(
    coupons: &mut [Coupon],
    plays: &mut Plays,
    request: &ClaimRequest,
    today: &str,
    now: DateTime<Utc>,
) -> Result<CouponCode, ClaimError> {
    record_play(plays, &request.device_id, today);

    let coupon = coupons
        .iter_mut()
        .find(|c| c.is_claimable(&request.game_id, request.score))
        .ok_or(ClaimError::NoCouponAvailable)?;

    coupon.claimed = true;
    coupon.claimed_by = Some(request.device_id.clone());
    coupon.claimed_at = Some(now);
    coupon.score_when_claimed = Some(request.score);
    Ok(coupon.code.clone())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CouponError {
    #[error("Please enter a code")]
    NoCodeEntered,
    #[error("Code required")]
    CodeRequired,
    #[error("Coupon not found")]
    NotFound,
    #[error("Coupon not yet claimed")]
    NotClaimed,
    #[error("Coupon already redeemed")]
    AlreadyRedeemed,
}

fn check_redeemable(coupon: &Coupon) -> Result<(), CouponError> {
    if !coupon.claimed {
        return Err(CouponError::NotClaimed);
    }
    if coupon.redeemed {
        return Err(CouponError::AlreadyRedeemed);
    }
    Ok(())
}

/// Codes match exactly; only an empty code counts as not entered.
fn entered(code: Option<&str>) -> Option<&str> {
    code.filter(|c| !c.is_empty())
}

pub fn verify<'a>(coupons: &'a [Coupon], code: Option<&str>) -> Result<&'a Coupon, CouponError> {
    let code = entered(code).ok_or(CouponError::NoCodeEntered)?;
    let coupon = coupons
        .iter()
        .find(|c| c.code == code)
        .ok_or(CouponError::NotFound)?;
    check_redeemable(coupon)?;
    Ok(coupon)
}

pub fn redeem<'a>(
    coupons: &'a mut [Coupon],
    code: Option<&str>,
    crew_name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<&'a Coupon, CouponError> {
    let code = entered(code).ok_or(CouponError::CodeRequired)?;
    let coupon = coupons
        .iter_mut()
        .find(|c| c.code == code)
        .ok_or(CouponError::NotFound)?;
    check_redeemable(coupon)?;

    let redeemer = crew_name
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_REDEEMER);
    coupon.redeemed = true;
    coupon.redeemed_by = Some(redeemer.to_string());
    coupon.redeemed_at = Some(now);
    Ok(coupon)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CouponCounts {
    pub total: usize,
    pub claimed: usize,
    pub redeemed: usize,
}

impl CouponCounts {
    fn tally(&mut self, coupon: &Coupon) {
        self.total += 1;
        if coupon.claimed {
            self.claimed += 1;
        }
        if coupon.redeemed {
            self.redeemed += 1;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub devices: usize,
    pub coupons: CouponCounts,
    pub by_game: BTreeMap<String, CouponCounts>,
}

pub fn stats(coupons: &[Coupon], plays: &Plays) -> Stats {
    let mut stats = Stats {
        devices: plays.len(),
        ..Stats::default()
    };
    for coupon in coupons {
        stats.coupons.tally(coupon);
        stats
            .by_game
            .entry(coupon.game_id.clone())
            .or_default()
            .tally(coupon);
    }
    stats
}
