use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect};
use serde::Serialize;
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Year,
    Month,
    Day,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueBucket {
    pub period: String,
    pub revenue: Decimal,
    pub orders: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub total_revenue: Decimal,
    pub total_orders: u64,
    pub breakdown: Vec<RevenueBucket>,
}

/// Reporting window implied by the optional year/month query.
#[derive(Debug, Clone, PartialEq)]
pub struct RevenueWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub granularity: Granularity,
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>, ServiceError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| ServiceError::ValidationError(format!("Invalid period {}-{}", year, month)))
}

pub fn resolve_window(year: Option<i32>, month: Option<u32>) -> Result<RevenueWindow, ServiceError> {
    match (year, month) {
        (None, None) => Ok(RevenueWindow {
            start: None,
            end: None,
            granularity: Granularity::Year,
        }),
        (None, Some(_)) => Err(ServiceError::ValidationError(
            "month requires year".into(),
        )),
        (Some(year), _) if !(1970..=9999).contains(&year) => Err(ServiceError::ValidationError(
            "year must be between 1970 and 9999".into(),
        )),
        (Some(year), None) => Ok(RevenueWindow {
            start: Some(month_start(year, 1)?),
            end: Some(month_start(year + 1, 1)?),
            granularity: Granularity::Month,
        }),
        (Some(year), Some(month)) => {
            if !(1..=12).contains(&month) {
                return Err(ServiceError::ValidationError(
                    "month must be between 1 and 12".into(),
                ));
            }
            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            Ok(RevenueWindow {
                start: Some(month_start(year, month)?),
                end: Some(month_start(next_year, next_month)?),
                granularity: Granularity::Day,
            })
        }
    }
}

fn period_label(at: DateTime<Utc>, granularity: Granularity) -> String {
    match granularity {
        Granularity::Year => format!("{:04}", at.year()),
        Granularity::Month => format!("{:04}-{:02}", at.year(), at.month()),
        Granularity::Day => format!("{:04}-{:02}-{:02}", at.year(), at.month(), at.day()),
    }
}

/// Buckets `(created_at, total)` pairs by period, oldest first.
pub fn aggregate(rows: &[(DateTime<Utc>, Decimal)], granularity: Granularity) -> RevenueReport {
    let mut buckets: BTreeMap<String, (Decimal, u64)> = BTreeMap::new();
    for (created_at, total) in rows {
        let entry = buckets
            .entry(period_label(*created_at, granularity))
            .or_insert((Decimal::ZERO, 0));
        entry.0 = entry.0.saturating_add(*total);
        entry.1 += 1;
    }

    let breakdown: Vec<RevenueBucket> = buckets
        .into_iter()
        .map(|(period, (revenue, orders))| RevenueBucket {
            period,
            revenue,
            orders,
        })
        .collect();

    RevenueReport {
        total_revenue: breakdown
            .iter()
            .fold(Decimal::ZERO, |acc, b| acc.saturating_add(b.revenue)),
        total_orders: breakdown.iter().map(|b| b.orders).sum(),
        breakdown,
    }
}

#[derive(Clone)]
pub struct RevenueService {
    db: Arc<DbPool>,
}

impl RevenueService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Revenue from paid or delivered orders, never counting cancellations.
    #[instrument(skip(self))]
    pub async fn report(
        &self,
        year: Option<i32>,
        month: Option<u32>,
    ) -> Result<RevenueReport, ServiceError> {
        let window = resolve_window(year, month)?;

        let mut query = order::Entity::find()
            .select_only()
            .column(order::Column::CreatedAt)
            .column(order::Column::TotalAmount)
            .filter(
                Condition::any()
                    .add(order::Column::PaymentStatus.eq(PaymentStatus::Paid))
                    .add(order::Column::Status.eq(OrderStatus::Delivered)),
            )
            .filter(order::Column::Status.ne(OrderStatus::Cancelled));
        if let Some(start) = window.start {
            query = query.filter(order::Column::CreatedAt.gte(start));
        }
        if let Some(end) = window.end {
            query = query.filter(order::Column::CreatedAt.lt(end));
        }

        let rows: Vec<(DateTime<Utc>, Decimal)> = query.into_tuple().all(&*self.db).await?;
        Ok(aggregate(&rows, window.granularity))
    }
}
