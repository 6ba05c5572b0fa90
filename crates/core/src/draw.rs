//! Random draw over the unselected cards

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Card, SessionStatus};

/// Outcome of a draw, computed before anything is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub card_id: Uuid,
    pub new_status: SessionStatus,
    /// Size of the unselected set the card was drawn from
    pub candidates: usize,
}

/// Draw one card uniformly at random from the unselected cards.
///
/// Drawing the last unselected card finishes the round; any earlier draw
/// moves the session to `picking`.
pub fn draw_card<R: Rng + ?Sized>(cards: &[Card], rng: &mut R) -> Result<Draw> {
    let unselected: Vec<&Card> = cards.iter().filter(|c| !c.selected).collect();
    let picked = unselected.choose(rng).ok_or(Error::NoUnselectedCards)?;

    Ok(Draw {
        card_id: picked.id,
        new_status: SessionStatus::after_draw(unselected.len()),
        candidates: unselected.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn cards(n: usize) -> Vec<Card> {
        (0..n)
            .map(|i| Card::new(Uuid::new_v4(), format!("topic {}", i)))
            .collect()
    }

    #[test]
    fn test_empty_draw_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            draw_card(&[], &mut rng),
            Err(Error::NoUnselectedCards)
        ));
    }

    #[test]
    fn test_all_selected_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut deck = cards(3);
        for card in &mut deck {
            card.selected = true;
        }
        assert!(matches!(
            draw_card(&deck, &mut rng),
            Err(Error::NoUnselectedCards)
        ));
    }

    #[test]
    fn test_last_card_finishes() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut deck = cards(3);
        deck[0].selected = true;
        deck[2].selected = true;

        let draw = draw_card(&deck, &mut rng).unwrap();
        assert_eq!(draw.card_id, deck[1].id);
        assert_eq!(draw.new_status, SessionStatus::Finished);
        assert_eq!(draw.candidates, 1);
    }

    #[test]
    fn test_multiple_candidates_pick() {
        let mut rng = StdRng::seed_from_u64(11);
        for n in 2..8 {
            let deck = cards(n);
            let draw = draw_card(&deck, &mut rng).unwrap();
            assert_eq!(draw.new_status, SessionStatus::Picking);
            assert!(deck.iter().any(|c| c.id == draw.card_id));
        }
    }

    #[test]
    fn test_never_draws_selected_card() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut deck = cards(4);
        deck[1].selected = true;
        for _ in 0..200 {
            let draw = draw_card(&deck, &mut rng).unwrap();
            assert_ne!(draw.card_id, deck[1].id);
        }
    }

    #[test]
    fn test_draw_is_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let deck = cards(4);
        let mut counts: HashMap<Uuid, u32> = HashMap::new();
        let trials = 8000;
        for _ in 0..trials {
            let draw = draw_card(&deck, &mut rng).unwrap();
            *counts.entry(draw.card_id).or_default() += 1;
        }

        // Expected 2000 each; allow a generous band
        for card in &deck {
            let count = counts.get(&card.id).copied().unwrap_or(0);
            assert!(
                (1700..=2300).contains(&count),
                "card drawn {} times out of {}",
                count,
                trials
            );
        }
    }
}
