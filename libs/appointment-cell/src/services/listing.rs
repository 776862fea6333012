use std::sync::Arc;

use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::error::ReservationError;
use crate::models::{ListAppointmentsQuery, ListingLimits, OrderBy, PageRequest, SlotFilter, SlotPage};
use crate::services::ledger::SlotLedger;
use crate::services::observer::{ObservedCall, Operation, ReservationObserver};

/// Paged, filtered reads over the ledger.
pub struct ListingService {
    ledger: Arc<dyn SlotLedger>,
    clock: Arc<dyn Clock>,
    limits: ListingLimits,
    observers: Vec<Arc<dyn ReservationObserver>>,
}

impl ListingService {
    pub fn new(ledger: Arc<dyn SlotLedger>, clock: Arc<dyn Clock>, limits: ListingLimits) -> Self {
        Self {
            ledger,
            clock,
            limits,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReservationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub async fn list(&self, query: ListAppointmentsQuery) -> Result<SlotPage, ReservationError> {
        let call = ObservedCall::start(&self.observers, Operation::List);
        let result = self.list_inner(query).await;
        call.finish(&result);
        result
    }

    #[instrument(skip(self))]
    async fn list_inner(&self, query: ListAppointmentsQuery) -> Result<SlotPage, ReservationError> {
        let (filter, page) = self.resolve(query)?;
        let result = self.ledger.list(&filter, &page).await?;

        debug!(
            "Listed {} of {} appointments (page {}, limit {})",
            result.appointments.len(),
            result.count,
            result.page,
            result.limit
        );
        Ok(result)
    }

    fn resolve(&self, query: ListAppointmentsQuery) -> Result<(SlotFilter, PageRequest), ReservationError> {
        let page = query.page.unwrap_or(1);
        if page == 0 {
            return Err(ReservationError::Validation("page starts at 1".to_string()));
        }

        let limit = query.limit.unwrap_or(self.limits.default_limit);
        if limit == 0 || limit > self.limits.max_limit {
            return Err(ReservationError::Validation(format!(
                "limit must be between 1 and {}",
                self.limits.max_limit
            )));
        }

        if let (Some(from), Some(to)) = (query.from_date, query.to_date) {
            if from > to {
                return Err(ReservationError::Validation(
                    "from_date must not be after to_date".to_string(),
                ));
            }
        }

        let order_by = match query.order_by.as_deref().map(str::trim) {
            None | Some("") => OrderBy::default(),
            Some(raw) => raw.parse::<OrderBy>().map_err(ReservationError::Validation)?,
        };

        let filter = SlotFilter {
            doctor_id: query.doctor_id,
            patient_id: query.patient_id,
            from_date: query.from_date,
            to_date: query.to_date,
            status: query.status,
            include_inactive: query.include_inactive.unwrap_or(false),
            as_of: Some(self.clock.now()),
        };

        Ok((filter, PageRequest { page, limit, order_by }))
    }
}
