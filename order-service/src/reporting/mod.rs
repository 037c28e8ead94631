//! Dashboard aggregation over the order history.
//!
//! Every function here is pure: the result depends only on the input rows as
//! a multiset, never on their order.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use shared::locale;
use shared::OrderStatus;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::models::{OrderSummary, SoldItem};
use crate::store::{RecordStore, StoreResult};

pub mod export;

const REVENUE_DAYS: usize = 7;
const BEST_SELLERS: usize = 5;
const UNKNOWN_PRODUCT: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_revenue: BigDecimal,
    pub total_orders: usize,
    pub pending_orders: usize,
    pub completed_orders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRevenue {
    /// vi-VN `d/m/yyyy`.
    pub date: String,
    pub revenue: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSales {
    pub name: String,
    pub total_sold: i64,
    pub revenue: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    /// Calendar date of generation in the report timezone.
    pub generated_on: NaiveDate,
    pub stats: Summary,
    pub revenue_by_day: Vec<DayRevenue>,
    pub best_sellers: Vec<ProductSales>,
    pub orders_by_status: Vec<StatusCount>,
}

pub fn summarize(orders: &[OrderSummary]) -> Summary {
    let count_status = |status: OrderStatus| {
        orders
            .iter()
            .filter(|o| o.status == status.as_str())
            .count()
    };

    Summary {
        total_revenue: orders
            .iter()
            .fold(BigDecimal::from(0), |sum, o| sum + &o.total),
        total_orders: orders.len(),
        pending_orders: count_status(OrderStatus::Pending),
        completed_orders: count_status(OrderStatus::Delivered),
    }
}

/// Revenue per calendar day in `tz`, ascending, limited to the latest seven days.
pub fn revenue_by_day(orders: &[OrderSummary], tz: Tz) -> Vec<DayRevenue> {
    let mut days: BTreeMap<NaiveDate, BigDecimal> = BTreeMap::new();
    for order in orders {
        let day = order.created_at.with_timezone(&tz).date_naive();
        *days.entry(day).or_insert_with(|| BigDecimal::from(0)) += &order.total;
    }

    let skip = days.len().saturating_sub(REVENUE_DAYS);
    days.into_iter()
        .skip(skip)
        .map(|(day, revenue)| DayRevenue {
            date: locale::format_date(day),
            revenue,
        })
        .collect()
}

/// Top five products by units sold; ties go to higher revenue, then to name.
pub fn best_sellers(items: &[SoldItem]) -> Vec<ProductSales> {
    let mut products: HashMap<&str, (i64, BigDecimal)> = HashMap::new();
    for item in items {
        let name = item.product_name.as_deref().unwrap_or(UNKNOWN_PRODUCT);
        let entry = products
            .entry(name)
            .or_insert_with(|| (0, BigDecimal::from(0)));
        entry.0 += i64::from(item.quantity);
        entry.1 += &item.price * BigDecimal::from(item.quantity);
    }

    let mut ranked: Vec<ProductSales> = products
        .into_iter()
        .map(|(name, (total_sold, revenue))| ProductSales {
            name: name.to_string(),
            total_sold,
            revenue,
        })
        .collect();
    ranked.sort_by(rank_products);
    ranked.truncate(BEST_SELLERS);
    ranked
}

fn rank_products(a: &ProductSales, b: &ProductSales) -> Ordering {
    b.total_sold
        .cmp(&a.total_sold)
        .then_with(|| b.revenue.cmp(&a.revenue))
        .then_with(|| a.name.cmp(&b.name))
}

/// Order counts per status, in the fixed status order. Statuses outside the
/// known table follow, by name, labelled with the raw value.
pub fn orders_by_status(orders: &[OrderSummary]) -> Vec<StatusCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for order in orders {
        *counts.entry(order.status.as_str()).or_default() += 1;
    }

    let mut result = Vec::with_capacity(counts.len());
    for status in OrderStatus::ALL {
        if let Some(count) = counts.remove(status.as_str()) {
            result.push(StatusCount {
                status: status.as_str().to_string(),
                label: status.label().to_string(),
                count,
            });
        }
    }
    result.extend(counts.into_iter().map(|(status, count)| StatusCount {
        status: status.to_string(),
        label: status.to_string(),
        count,
    }));
    result
}

pub fn build_report(
    orders: &[OrderSummary],
    items: &[SoldItem],
    tz: Tz,
    generated_at: DateTime<Utc>,
) -> Report {
    Report {
        generated_at,
        generated_on: generated_at.with_timezone(&tz).date_naive(),
        stats: summarize(orders),
        revenue_by_day: revenue_by_day(orders, tz),
        best_sellers: best_sellers(items),
        orders_by_status: orders_by_status(orders),
    }
}

pub async fn load_report(store: &dyn RecordStore, tz: Tz) -> StoreResult<Report> {
    let orders = store.order_summaries().await?;
    let items = store.sold_items().await?;
    Ok(build_report(&orders, &items, tz, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Ho_Chi_Minh;

    fn order(total: i64, status: &str, created_at: DateTime<Utc>) -> OrderSummary {
        OrderSummary {
            total: BigDecimal::from(total),
            status: status.to_string(),
            created_at,
        }
    }

    fn sold(name: Option<&str>, quantity: i32, price: i64) -> SoldItem {
        SoldItem {
            product_name: name.map(str::to_string),
            quantity,
            price: BigDecimal::from(price),
        }
    }

    fn day(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, hour, 0, 0).unwrap()
    }

    #[test]
    fn summarizes_revenue_and_status_counts() {
        let orders = vec![
            order(250_000, "pending", day(1, 3)),
            order(100_000, "delivered", day(2, 3)),
            order(50_000, "pending", day(2, 4)),
            order(10_000, "cancelled", day(3, 4)),
        ];

        let stats = summarize(&orders);
        assert_eq!(stats.total_revenue, BigDecimal::from(410_000));
        assert_eq!(stats.total_orders, 4);
        assert_eq!(stats.pending_orders, 2);
        assert_eq!(stats.completed_orders, 1);
    }

    #[test]
    fn revenue_keeps_latest_seven_days_ascending() {
        let orders: Vec<OrderSummary> = (1..=10)
            .rev()
            .map(|d| order(i64::from(d) * 1_000, "pending", day(d, 3)))
            .collect();

        let days = revenue_by_day(&orders, Ho_Chi_Minh);
        assert_eq!(days.len(), 7);
        assert_eq!(days[0].date, "4/3/2026");
        assert_eq!(days[6].date, "10/3/2026");
        assert_eq!(days[6].revenue, BigDecimal::from(10_000));
    }

    #[test]
    fn revenue_groups_by_local_calendar_day() {
        // 18:30 UTC on the 1st is already the 2nd in Ho Chi Minh City.
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        let orders = vec![order(1_000, "pending", late), order(2_000, "pending", day(2, 5))];

        let days = revenue_by_day(&orders, Ho_Chi_Minh);
        assert_eq!(
            days,
            vec![DayRevenue {
                date: "2/3/2026".to_string(),
                revenue: BigDecimal::from(3_000),
            }]
        );
    }

    #[test]
    fn input_order_does_not_change_the_report() {
        let orders = vec![
            order(250_000, "pending", day(1, 3)),
            order(100_000, "delivered", day(5, 3)),
            order(50_000, "shipped", day(3, 4)),
            order(75_000, "refunded", day(5, 9)),
        ];
        let items = vec![
            sold(Some("A"), 2, 100_000),
            sold(Some("B"), 1, 50_000),
            sold(None, 3, 10_000),
            sold(Some("A"), 1, 100_000),
        ];
        let at = day(6, 0);

        let forward = build_report(&orders, &items, Ho_Chi_Minh, at);

        let mut orders_rev = orders.clone();
        orders_rev.reverse();
        let mut items_rev = items.clone();
        items_rev.reverse();
        let backward = build_report(&orders_rev, &items_rev, Ho_Chi_Minh, at);

        assert_eq!(forward.stats, backward.stats);
        assert_eq!(forward.revenue_by_day, backward.revenue_by_day);
        assert_eq!(forward.best_sellers, backward.best_sellers);
        assert_eq!(forward.orders_by_status, backward.orders_by_status);
    }

    #[test]
    fn best_sellers_rank_by_quantity_then_revenue_then_name() {
        let items = vec![
            sold(Some("Chuột"), 3, 10_000),
            sold(Some("Bàn phím"), 3, 20_000),
            sold(Some("Tai nghe"), 3, 20_000),
            sold(Some("Màn hình"), 5, 1_000),
            sold(Some("Loa"), 1, 500_000),
            sold(Some("Cáp"), 1, 1_000),
            sold(None, 2, 1_000),
        ];

        let top = best_sellers(&items);
        let names: Vec<&str> = top.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Màn hình", "Bàn phím", "Tai nghe", "Chuột", "Unknown"]
        );
        assert_eq!(top[1].revenue, BigDecimal::from(60_000));
    }

    #[test]
    fn status_counts_follow_fixed_order_with_labels() {
        let orders = vec![
            order(1, "delivered", day(1, 1)),
            order(1, "refunded", day(1, 1)),
            order(1, "pending", day(1, 1)),
            order(1, "delivered", day(1, 1)),
        ];

        let counts = orders_by_status(&orders);
        assert_eq!(counts.len(), 3);
        assert_eq!(counts[0].label, "Đang chờ");
        assert_eq!(counts[1].label, "Đã giao");
        assert_eq!(counts[1].count, 2);
        assert_eq!(counts[2].label, "refunded");
    }

    #[test]
    fn empty_history_yields_empty_report() {
        let report = build_report(&[], &[], Ho_Chi_Minh, day(1, 0));
        assert_eq!(report.stats.total_revenue, BigDecimal::from(0));
        assert!(report.revenue_by_day.is_empty());
        assert!(report.best_sellers.is_empty());
        assert!(report.orders_by_status.is_empty());
    }
}
