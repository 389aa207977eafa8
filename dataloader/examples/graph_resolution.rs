use fibre_dataloader::DataLoader;
use futures_util::future;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone)]
struct User {
  id: u32,
  name: String,
  friends: Vec<u32>,
}

// A simulated database that can fetch many rows in one round trip.
async fn fetch_users(db: Arc<HashMap<u32, User>>, ids: Vec<u32>) -> Vec<Result<User, String>> {
  println!("--- Database: SELECT * FROM users WHERE id IN {:?}", ids);
  sleep(Duration::from_millis(50)).await;
  ids
    .into_iter()
    .map(|id| db.get(&id).cloned().ok_or_else(|| format!("no user {}", id)))
    .collect()
}

fn seed() -> HashMap<u32, User> {
  let rows = [
    (1, "ada", vec![2, 3]),
    (2, "brian", vec![1, 3, 4]),
    (3, "chen", vec![1]),
    (4, "dana", vec![2, 5]),
  ];
  rows
    .into_iter()
    .map(|(id, name, friends)| {
      (
        id,
        User {
          id,
          name: name.to_string(),
          friends,
        },
      )
    })
    .collect()
}

#[tokio::main]
async fn main() {
  let db = Arc::new(seed());

  let users = DataLoader::<u32, User, String>::builder()
    .max_batch_size(100)
    .build({
      let db = db.clone();
      move |_, ids: Vec<u32>| {
        let db = db.clone();
        async move { Ok(fetch_users(db, ids).await) }
      }
    })
    .expect("Failed to build loader");

  println!("--- Resolving friends of friends for users 1 and 2 ---\n");

  // Each level of the graph is one query, no matter how many users it holds.
  let roots = users.load_many(vec![1, 2]).await;
  for root in roots {
    let root = root.expect("root user exists");
    let friends: Vec<User> = users
      .load_many(root.friends.clone())
      .await
      .into_iter()
      .flatten()
      .collect();

    // Friends of every friend are requested together and share one batch.
    let second_level = future::join_all(
      friends
        .iter()
        .map(|friend| users.load_many(friend.friends.clone())),
    )
    .await;

    for (friend, results) in friends.iter().zip(second_level) {
      let names: Vec<String> = results
        .into_iter()
        .map(|user| match user {
          Ok(user) => user.name,
          Err(error) => format!("<{}>", error),
        })
        .collect();
      println!("{} -> {} -> {:?}", root.name, friend.name, names);
    }
  }

  match users.load(99).await {
    Ok(user) => println!("\nUnexpected user {}", user.id),
    Err(error) => println!("\nMissing users are reported per key: {}", error),
  }

  println!("\n--- Verification ---");
  println!("{:#?}", users.metrics());
}
