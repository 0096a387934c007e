use std::fmt::Write;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::ai::parsing::parse_insights;
use crate::ai::{AIBackend, AIClient};
use crate::error::Result;
use crate::models::{Insight, Priority, SpendingAggregate};

use super::InsightProvider;

const DEFAULT_NOTIFICATION_TITLE: &str = "📊 Daily Summary";
const DEFAULT_NOTIFICATION_BODY: &str = "Check your spending insights in the app!";

/// Gemini-backed insight generator with deterministic fallbacks
#[derive(Clone)]
pub struct InsightGenerator {
    ai: AIClient,
}

impl InsightGenerator {
    pub fn new(ai: AIClient) -> Self {
        Self { ai }
    }

    pub fn ai(&self) -> &AIClient {
        &self.ai
    }
}

#[async_trait]
impl InsightProvider for InsightGenerator {
    async fn generate(&self, aggregate: &SpendingAggregate) -> Result<Vec<Insight>> {
        if aggregate.is_empty() {
            debug!(user_id = aggregate.user_id, "No transactions in window, skipping generation");
            return Ok(Vec::new());
        }

        let prompt = build_prompt(aggregate);
        let response = self.ai.generate(&prompt).await?;

        match parse_insights(&response) {
            Ok(insights) if !insights.is_empty() => Ok(insights),
            Ok(_) => {
                warn!(user_id = aggregate.user_id, "AI returned no insights, using fallback");
                Ok(fallback_insights(aggregate))
            }
            Err(e) => {
                warn!(user_id = aggregate.user_id, error = %e, "Failed to parse AI response, using fallback");
                Ok(fallback_insights(aggregate))
            }
        }
    }
}

/// Analysis prompt for one aggregate; categories appear in sorted order
pub fn build_prompt(aggregate: &SpendingAggregate) -> String {
    let mut categories = String::new();
    for (category, amount) in &aggregate.by_category {
        let _ = writeln!(categories, "- {}: K{:.2}", category, amount);
    }

    format!(
        r#"You are a friendly financial advisor for a Zambian mobile money tracking app called "Kwacha Tracker".

Analyze this user's spending data and generate 2-3 personalized insights.

**Spending Data ({period}):**
- Total Income: K{income:.2}
- Total Expenses: K{expenses:.2}
- Net Balance: K{net:.2}
- Savings Deposits: K{savings:.2}
- Transaction Count: {count}

**Category Breakdown:**
{categories}
**Instructions:**
1. Be encouraging and positive, especially about savings
2. Use Zambian Kwacha (K) for amounts
3. Keep each insight under 50 words
4. Focus on actionable tips
5. If savings > 10% of income, congratulate them

**Output Format (JSON array):**
[
  {{"title": "...", "message": "...", "category": "spending|savings|tip", "priority": "high|medium|low"}}
]

Only output valid JSON, no additional text."#,
        period = aggregate.period.as_str(),
        income = aggregate.total_income,
        expenses = aggregate.total_expenses,
        net = aggregate.net_balance,
        savings = aggregate.savings_total,
        count = aggregate.transaction_count,
        categories = categories,
    )
}

/// Rule-based insights used when the model output is unusable
pub fn fallback_insights(aggregate: &SpendingAggregate) -> Vec<Insight> {
    let mut insights = Vec::new();

    if aggregate.savings_total > 0.0 {
        insights.push(Insight {
            title: "💰 Great Saving Habit!".to_string(),
            message: format!(
                "You've saved K{:.0} this period. Keep it up!",
                aggregate.savings_total
            ),
            category: "savings".to_string(),
            priority: Priority::High,
        });
    }

    if aggregate.net_balance > 0.0 {
        insights.push(Insight {
            title: "📈 Positive Balance".to_string(),
            message: format!(
                "Your income exceeds expenses by K{:.0}. Consider saving the surplus!",
                aggregate.net_balance
            ),
            category: "tip".to_string(),
            priority: Priority::Medium,
        });
    } else if aggregate.net_balance < 0.0 {
        insights.push(Insight {
            title: "⚠️ Spending Alert".to_string(),
            message: format!(
                "You've spent K{:.0} more than earned. Review your expenses.",
                -aggregate.net_balance
            ),
            category: "spending".to_string(),
            priority: Priority::High,
        });
    }

    insights
}

/// Pick the push title/body: first high-priority insight, else the first one
pub fn notification_text(insights: &[Insight]) -> (String, String) {
    insights
        .iter()
        .find(|i| i.priority == Priority::High)
        .or_else(|| insights.first())
        .map(|i| (i.title.clone(), i.message.clone()))
        .unwrap_or_else(|| {
            (
                DEFAULT_NOTIFICATION_TITLE.to_string(),
                DEFAULT_NOTIFICATION_BODY.to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockBackend;
    use crate::models::Period;

    fn aggregate(income: f64, expenses: f64, savings: f64) -> SpendingAggregate {
        let mut agg = SpendingAggregate::empty(7, Period::Daily);
        agg.total_income = income;
        agg.total_expenses = expenses;
        agg.net_balance = income - expenses;
        agg.savings_total = savings;
        agg.transaction_count = 4;
        agg.by_category.insert("TRANSPORT".into(), 30.0);
        agg.by_category.insert("AIRTIME".into(), 20.0);
        agg
    }

    fn insight(title: &str, priority: Priority) -> Insight {
        Insight {
            title: title.into(),
            message: format!("{} message", title),
            category: "tip".into(),
            priority,
        }
    }

    #[test]
    fn test_prompt_contains_figures_in_category_order() {
        let prompt = build_prompt(&aggregate(500.0, 200.0, 50.0));
        assert!(prompt.contains("**Spending Data (daily):**"));
        assert!(prompt.contains("- Total Income: K500.00"));
        assert!(prompt.contains("- Net Balance: K300.00"));
        assert!(prompt.contains("- Savings Deposits: K50.00"));
        assert!(prompt.contains("- Transaction Count: 4"));
        assert!(prompt.contains("savings > 10% of income"));

        let airtime = prompt.find("- AIRTIME: K20.00").unwrap();
        let transport = prompt.find("- TRANSPORT: K30.00").unwrap();
        assert!(airtime < transport);
    }

    #[test]
    fn test_fallback_saver_with_surplus() {
        let insights = fallback_insights(&aggregate(500.0, 200.0, 50.0));
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].title, "💰 Great Saving Habit!");
        assert_eq!(insights[0].message, "You've saved K50 this period. Keep it up!");
        assert_eq!(insights[0].priority, Priority::High);
        assert_eq!(insights[1].category, "tip");
        assert!(insights[1].message.contains("K300"));
    }

    #[test]
    fn test_fallback_overspend() {
        let insights = fallback_insights(&aggregate(100.0, 250.0, 0.0));
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].title, "⚠️ Spending Alert");
        assert_eq!(
            insights[0].message,
            "You've spent K150 more than earned. Review your expenses."
        );
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let agg = aggregate(100.0, 250.0, 10.0);
        assert_eq!(fallback_insights(&agg), fallback_insights(&agg));
    }

    #[test]
    fn test_notification_prefers_first_high() {
        let insights = vec![
            insight("a", Priority::Low),
            insight("b", Priority::High),
            insight("c", Priority::High),
        ];
        assert_eq!(notification_text(&insights).0, "b");

        let insights = vec![insight("a", Priority::Low), insight("b", Priority::Medium)];
        assert_eq!(notification_text(&insights).0, "a");

        let (title, body) = notification_text(&[]);
        assert_eq!(title, "📊 Daily Summary");
        assert_eq!(body, "Check your spending insights in the app!");
    }

    #[tokio::test]
    async fn test_empty_aggregate_skips_ai() {
        let mock = MockBackend::new();
        let generator = InsightGenerator::new(AIClient::Mock(mock.clone()));

        let insights = generator
            .generate(&SpendingAggregate::empty(1, Period::Daily))
            .await
            .unwrap();
        assert!(insights.is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_generate_parses_model_output() {
        let mock = MockBackend::new();
        let generator = InsightGenerator::new(AIClient::Mock(mock.clone()));

        let insights = generator.generate(&aggregate(500.0, 200.0, 0.0)).await.unwrap();
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].priority, Priority::High);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_output_falls_back() {
        let generator =
            InsightGenerator::new(AIClient::Mock(MockBackend::with_response("Sorry, no.")));
        let agg = aggregate(100.0, 250.0, 0.0);

        let insights = generator.generate(&agg).await.unwrap();
        assert_eq!(insights, fallback_insights(&agg));

        let generator = InsightGenerator::new(AIClient::Mock(MockBackend::with_response("[]")));
        assert_eq!(generator.generate(&agg).await.unwrap(), fallback_insights(&agg));
    }

    #[tokio::test]
    async fn test_service_failure_is_error() {
        let generator = InsightGenerator::new(AIClient::Mock(MockBackend::failing()));
        assert!(generator.generate(&aggregate(1.0, 2.0, 0.0)).await.is_err());
    }
}
