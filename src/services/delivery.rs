use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::password::{hash_password, MIN_PASSWORD_LENGTH};
use crate::db::DbPool;
use crate::entities::deliveryman;
use crate::entities::order::{self, DeliveryDecision, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::orders::{OrderService, OrderWithItems};

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub vehicle_type: Option<String>,
    pub vehicle_number: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentChanges {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub vehicle_type: Option<String>,
    pub vehicle_number: Option<String>,
    pub is_active: Option<bool>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub active: Option<bool>,
    pub available: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub total_deliveries: i32,
    pub completed_deliveries: i32,
    pub pending_deliveries: u64,
    pub accepted_orders: u64,
    pub denied_orders: u64,
    pub rating: f64,
    /// Completed over total, as a percentage with two decimals
    pub success_rate: f64,
}

pub fn success_rate(completed: i32, total: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let rate = f64::from(completed) / f64::from(total) * 100.0;
    (rate * 100.0).round() / 100.0
}

fn closed_statuses() -> [OrderStatus; 2] {
    [OrderStatus::Delivered, OrderStatus::Cancelled]
}

#[derive(Clone)]
pub struct DeliveryService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    orders: Arc<OrderService>,
}

impl DeliveryService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, orders: Arc<OrderService>) -> Self {
        Self {
            db,
            event_sender,
            orders,
        }
    }

    pub async fn agent(&self, id: Uuid) -> Result<deliveryman::Model, ServiceError> {
        deliveryman::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Deliveryman", id))
    }

    // Admin management

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_agent(&self, input: NewAgent) -> Result<deliveryman::Model, ServiceError> {
        let email = input.email.trim().to_lowercase();
        if input.password.len() < MIN_PASSWORD_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        let taken = deliveryman::Entity::find()
            .filter(deliveryman::Column::Email.eq(email.as_str()))
            .count(&*self.db)
            .await?;
        if taken > 0 {
            return Err(ServiceError::Conflict(
                "A deliveryman with this email already exists".into(),
            ));
        }

        let now = Utc::now();
        let agent = deliveryman::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            phone: Set(input.phone.trim().to_string()),
            password_hash: Set(hash_password(&input.password).await?),
            vehicle_type: Set(input.vehicle_type),
            vehicle_number: Set(input.vehicle_number),
            is_active: Set(true),
            is_available: Set(true),
            latitude: Set(None),
            longitude: Set(None),
            total_deliveries: Set(0),
            completed_deliveries: Set(0),
            rating: Set(0.0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(deliveryman_id = %agent.id, "deliveryman created");
        Ok(agent)
    }

    pub async fn list_agents(
        &self,
        filter: AgentFilter,
    ) -> Result<Vec<deliveryman::Model>, ServiceError> {
        let mut query = deliveryman::Entity::find().order_by_desc(deliveryman::Column::CreatedAt);
        if let Some(active) = filter.active {
            query = query.filter(deliveryman::Column::IsActive.eq(active));
        }
        if let Some(available) = filter.available {
            query = query.filter(deliveryman::Column::IsAvailable.eq(available));
        }
        Ok(query.all(&*self.db).await?)
    }

    #[instrument(skip(self, changes))]
    pub async fn update_agent(
        &self,
        id: Uuid,
        changes: AgentChanges,
    ) -> Result<deliveryman::Model, ServiceError> {
        let mut active: deliveryman::ActiveModel = self.agent(id).await?.into();
        if let Some(name) = changes.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(phone) = changes.phone {
            active.phone = Set(phone.trim().to_string());
        }
        if let Some(vehicle_type) = changes.vehicle_type {
            active.vehicle_type = Set(Some(vehicle_type));
        }
        if let Some(vehicle_number) = changes.vehicle_number {
            active.vehicle_number = Set(Some(vehicle_number));
        }
        if let Some(is_active) = changes.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(is_available) = changes.is_available {
            active.is_available = Set(is_available);
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn toggle_active(&self, id: Uuid) -> Result<deliveryman::Model, ServiceError> {
        let agent = self.agent(id).await?;
        let now_active = !agent.is_active;
        let mut active: deliveryman::ActiveModel = agent.into();
        active.is_active = Set(now_active);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        info!(deliveryman_id = %id, is_active = now_active, "deliveryman activation toggled");
        Ok(updated)
    }

    /// Refused while the agent still holds undelivered assignments.
    #[instrument(skip(self))]
    pub async fn delete_agent(&self, id: Uuid) -> Result<(), ServiceError> {
        self.agent(id).await?;
        let open = order::Entity::find()
            .filter(order::Column::DeliverymanId.eq(id))
            .filter(order::Column::Status.is_not_in(closed_statuses()))
            .count(&*self.db)
            .await?;
        if open > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Deliveryman still has {} undelivered order(s)",
                open
            )));
        }
        deliveryman::Entity::delete_by_id(id).exec(&*self.db).await?;
        info!(deliveryman_id = %id, "deliveryman deleted");
        Ok(())
    }

    /// Hands an open order to an active agent and puts it out for delivery.
    #[instrument(skip(self))]
    pub async fn assign(
        &self,
        order_id: Uuid,
        deliveryman_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let existing = self.orders.find(order_id).await?;
        let agent = self.agent(deliveryman_id).await?;
        if !agent.is_active {
            return Err(ServiceError::ValidationError(
                "Deliveryman is not active".into(),
            ));
        }
        if existing.status.is_terminal() {
            return Err(ServiceError::ValidationError(format!(
                "Cannot assign an order that is {}",
                existing.status
            )));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let mut active: order::ActiveModel = existing.into();
        active.deliveryman_id = Set(Some(deliveryman_id));
        active.assigned_at = Set(Some(now));
        active.deliveryman_decision = Set(Some(DeliveryDecision::Pending));
        active.decision_at = Set(None);
        active.decision_note = Set(None);
        active.status = Set(OrderStatus::OutForDelivery);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        deliveryman::Entity::update_many()
            .col_expr(
                deliveryman::Column::TotalDeliveries,
                Expr::col(deliveryman::Column::TotalDeliveries).add(1),
            )
            .filter(deliveryman::Column::Id.eq(deliveryman_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(%order_id, %deliveryman_id, "order assigned");
        self.event_sender
            .send_or_log(Event::OrderAssigned {
                order_id,
                deliveryman_id,
            })
            .await;

        self.orders.load(order_id).await
    }

    // Agent self-service

    async fn assigned_to(
        &self,
        deliveryman_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let existing = self.orders.find(order_id).await?;
        if existing.deliveryman_id != Some(deliveryman_id) {
            return Err(ServiceError::Forbidden(
                "This order is not assigned to you".into(),
            ));
        }
        Ok(existing)
    }

    pub async fn set_availability(
        &self,
        id: Uuid,
        is_available: bool,
    ) -> Result<deliveryman::Model, ServiceError> {
        self.update_agent(
            id,
            AgentChanges {
                is_available: Some(is_available),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_location(
        &self,
        id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<deliveryman::Model, ServiceError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(ServiceError::ValidationError(
                "Coordinates out of range".into(),
            ));
        }
        let mut active: deliveryman::ActiveModel = self.agent(id).await?.into();
        active.latitude = Set(Some(latitude));
        active.longitude = Set(Some(longitude));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn assigned_orders(
        &self,
        deliveryman_id: Uuid,
        status: Option<OrderStatus>,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let mut query = order::Entity::find()
            .filter(order::Column::DeliverymanId.eq(deliveryman_id))
            .order_by_desc(order::Column::AssignedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        Ok(query.all(&*self.db).await?)
    }

    /// Records the agent's accept/deny exactly once per assignment.
    #[instrument(skip(self, note))]
    pub async fn decide(
        &self,
        deliveryman_id: Uuid,
        order_id: Uuid,
        decision: DeliveryDecision,
        note: Option<String>,
    ) -> Result<OrderWithItems, ServiceError> {
        if decision == DeliveryDecision::Pending {
            return Err(ServiceError::ValidationError(
                "Decision must be Accepted or Denied".into(),
            ));
        }
        self.assigned_to(deliveryman_id, order_id).await?;

        let now = Utc::now();
        let result = order::Entity::update_many()
            .col_expr(order::Column::DeliverymanDecision, Expr::value(decision))
            .col_expr(order::Column::DecisionAt, Expr::value(Some(now)))
            .col_expr(order::Column::DecisionNote, Expr::value(note))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeliverymanId.eq(deliveryman_id))
            .filter(order::Column::DeliverymanDecision.eq(DeliveryDecision::Pending))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "A decision has already been recorded for this order".into(),
            ));
        }

        info!(%order_id, %deliveryman_id, decision = %decision, "delivery decision recorded");
        self.event_sender
            .send_or_log(Event::DeliveryDecisionRecorded {
                order_id,
                deliveryman_id,
                decision: decision.to_string(),
            })
            .await;

        self.orders.load(order_id).await
    }

    /// Agent-driven status change. Delivered requires an accepted assignment;
    /// only the first transition into Delivered counts as a completion.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        deliveryman_id: Uuid,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderWithItems, ServiceError> {
        let existing = self.assigned_to(deliveryman_id, order_id).await?;
        let now = Utc::now();

        if status != OrderStatus::Delivered {
            let old_status = existing.status;
            let mut active: order::ActiveModel = existing.into();
            active.status = Set(status);
            active.updated_at = Set(now);
            active.update(&*self.db).await?;
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: status.to_string(),
                })
                .await;
            return self.orders.load(order_id).await;
        }

        if existing.deliveryman_decision != Some(DeliveryDecision::Accepted) {
            return Err(ServiceError::ValidationError(
                "Order must be accepted before it can be delivered".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let delivered = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Delivered))
            .col_expr(order::Column::DeliveredAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.ne(OrderStatus::Delivered))
            .exec(&txn)
            .await?;
        if delivered.rows_affected == 1 {
            deliveryman::Entity::update_many()
                .col_expr(
                    deliveryman::Column::CompletedDeliveries,
                    Expr::col(deliveryman::Column::CompletedDeliveries).add(1),
                )
                .filter(deliveryman::Column::Id.eq(deliveryman_id))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        if delivered.rows_affected == 1 {
            info!(%order_id, %deliveryman_id, "order delivered");
            self.event_sender
                .send_or_log(Event::OrderDelivered {
                    order_id,
                    deliveryman_id: Some(deliveryman_id),
                })
                .await;
        }

        self.orders.load(order_id).await
    }

    pub async fn stats(&self, deliveryman_id: Uuid) -> Result<AgentStats, ServiceError> {
        let agent = self.agent(deliveryman_id).await?;
        let assigned = || order::Entity::find().filter(order::Column::DeliverymanId.eq(deliveryman_id));

        let pending_deliveries = assigned()
            .filter(order::Column::Status.is_not_in(closed_statuses()))
            .count(&*self.db)
            .await?;
        let accepted_orders = assigned()
            .filter(order::Column::DeliverymanDecision.eq(DeliveryDecision::Accepted))
            .count(&*self.db)
            .await?;
        let denied_orders = assigned()
            .filter(order::Column::DeliverymanDecision.eq(DeliveryDecision::Denied))
            .count(&*self.db)
            .await?;

        Ok(AgentStats {
            total_deliveries: agent.total_deliveries,
            completed_deliveries: agent.completed_deliveries,
            pending_deliveries,
            accepted_orders,
            denied_orders,
            rating: agent.rating,
            success_rate: success_rate(agent.completed_deliveries, agent.total_deliveries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0.0)]
    #[case(1, 3, 33.33)]
    #[case(2, 2, 100.0)]
    #[case(5, 8, 62.5)]
    fn success_rate_is_a_two_decimal_percentage(
        #[case] completed: i32,
        #[case] total: i32,
        #[case] expected: f64,
    ) {
        assert_eq!(success_rate(completed, total), expected);
    }
}
