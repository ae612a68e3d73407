//! Daily serial numbers for workflow instances
//!
//! Layout: `YYYYMMDD` + three random digits + four digit daily counter.
//! The counter is read from storage and is not protected against
//! concurrent writers; two workflows started at the same moment can
//! receive the same counter.

use crate::error::Result;
use crate::store::Transaction;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use rand::Rng;

/// Compose a serial from its parts
pub fn format_serial(date: NaiveDate, random: u16, counter: i64) -> String {
    format!("{}{:03}{:04}", date.format("%Y%m%d"), random, counter)
}

/// Start of the local calendar day containing `now`, in UTC
pub fn start_of_day(now: DateTime<Local>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or(now)
        .with_timezone(&Utc)
}

/// Next serial for a workflow created at `now`
pub async fn generate_serials(tx: &mut dyn Transaction, now: DateTime<Local>) -> Result<String> {
    let created_today = tx.count_workflows_since(start_of_day(now)).await?;
    let random: u16 = rand::thread_rng().gen_range(100..=999);
    Ok(format_serial(now.date_naive(), random, created_today + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store, WorkflowRepository};
    use workflow_types::{UserId, Workflow, WorkflowId, WorkflowStatus, WorkflowTypeId};

    fn workflow_at(created_at: DateTime<Utc>) -> Workflow {
        Workflow {
            id: WorkflowId::new(0),
            type_id: WorkflowTypeId::new(1),
            type_name: "Leave".to_string(),
            serials: String::new(),
            title: "t".to_string(),
            promoter: UserId::new(1),
            status: WorkflowStatus::Running,
            node: 1,
            submit_num: 1,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_format_serial_pads_parts() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_serial(date, 123, 7), "202403071230007");
        assert_eq!(format_serial(date, 999, 12345), "2024030799912345");
    }

    #[tokio::test]
    async fn test_counter_counts_only_today() {
        let store = MemoryStore::new();
        let now = Local::now();
        let mut tx = store.begin().await.unwrap();

        tx.insert_workflow(&workflow_at(start_of_day(now) - chrono::Duration::minutes(1)))
            .await
            .unwrap();
        let first = generate_serials(tx.as_mut(), now).await.unwrap();
        assert!(first.ends_with("0001"), "unexpected serial {}", first);

        tx.insert_workflow(&workflow_at(Utc::now())).await.unwrap();
        tx.insert_workflow(&workflow_at(Utc::now())).await.unwrap();
        let third = generate_serials(tx.as_mut(), now).await.unwrap();
        assert!(third.ends_with("0003"), "unexpected serial {}", third);

        assert_eq!(&third[..8], now.format("%Y%m%d").to_string());
        let random: u16 = third[8..11].parse().unwrap();
        assert!((100..=999).contains(&random));
    }
}
