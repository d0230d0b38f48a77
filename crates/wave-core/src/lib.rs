pub mod events;
pub mod player;
pub mod question;
pub mod room;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::player::Player;
    use crate::question::{Difficulty, Question};
    use crate::room::{Room, RoomId, RoomSettings, generate_room_code};

    /// Create `n` players named `player1..playerN`; the first is the host.
    pub fn make_players(n: usize) -> Vec<Player> {
        (0..n)
            .map(|i| {
                Player::new(
                    format!("0xwallet{}", i + 1),
                    format!("player{}", i + 1),
                    i == 0,
                )
            })
            .collect()
    }

    /// A waiting room seeded with `n` players and default settings.
    pub fn make_room(n: usize) -> Room {
        let mut players = make_players(n);
        let host = players.remove(0);
        let mut room = Room::new(
            RoomId::new_v4(),
            generate_room_code(),
            host,
            RoomSettings::default(),
        );
        room.players.extend(players);
        room
    }

    /// A four-option question with the answer at index 0.
    pub fn make_question(id: &str, difficulty: Difficulty) -> Question {
        Question {
            id: id.to_string(),
            content: format!("Question {id}?"),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_option: 0,
            difficulty,
        }
    }
}
