use serde_json::json;
use tradesim_models::agent_message::{AgentContext, MarketSnapshot};
use tradesim_models::ledger::Position;

fn response_schema() -> String {
    let example = json!({
        "reasoning": "<step-by-step analysis of the portfolio and today's prices>",
        "summary": "<one or two sentences describing what you did and why>",
        "actions": [
            {"action": "buy", "symbol": "AAPL", "quantity": 10},
            {"action": "sell", "symbol": "MSFT", "quantity": 5}
        ]
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

/// System prompt shared by every trading model.
pub fn trading_system_prompt() -> String {
    format!(
        "You are an autonomous portfolio manager in a daily trading simulation. Each \
         session covers exactly one trading date. You receive your current cash, your \
         current holdings and the opening price of every tradable symbol for that date.\n\n\
         ## RULES\n\n\
         - All trades execute at today's opening price. Do not quote prices yourself.\n\
         - Buys must not exceed available cash, counting earlier buys in the same list.\n\
         - Sells must not exceed shares held, counting earlier actions in the same list.\n\
         - Quantities must be positive whole numbers of shares.\n\
         - Only symbols listed in `prices` can be traded.\n\
         - Actions execute in the order given.\n\
         - If nothing is worth doing, return an empty `actions` list.\n\
         - You have no information about any date after the session date.\n\n\
         ## OUTPUT FORMAT\n\n\
         Respond with ONLY a valid JSON object matching this structure:\n{}\n",
        response_schema()
    )
}

/// User prompt for one model-day, serialized as JSON.
pub fn session_prompt(
    context: &AgentContext,
    position: &Position,
    snapshot: &MarketSnapshot,
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&json!({
        "date": context.date,
        "model": context.model,
        "cash": position.cash,
        "holdings": position.holdings,
        "prices": snapshot.prices,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[test]
    fn system_prompt_includes_schema() {
        let prompt = trading_system_prompt();
        assert!(prompt.contains("opening price"));
        assert!(prompt.contains("\"actions\""));
        assert!(prompt.contains("whole numbers of shares"));
    }

    #[test]
    fn session_prompt_carries_position_and_prices() {
        let context = AgentContext {
            job_id: "job-1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            model: "alpha".to_string(),
            trading_day_id: 7,
        };
        let mut position = Position::cash_only(dec!(9000));
        position.set_quantity("AAPL", dec!(10));
        let snapshot = MarketSnapshot {
            date: context.date,
            prices: [("AAPL".to_string(), dec!(110))].into_iter().collect(),
        };

        let prompt = session_prompt(&context, &position, &snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&prompt).unwrap();
        assert_eq!(value["date"], "2025-01-06");
        assert_eq!(value["cash"], "9000");
        assert_eq!(value["holdings"]["AAPL"], "10");
        assert_eq!(value["prices"]["AAPL"], "110");
    }
}
