//! Sample data for a fresh database (`shelf --seed`).

use anyhow::Context;
use tracing::info;

use shelf_crypto::identity::pseudonymous_key;
use shelf_db::models::LikeOutcome;
use shelf_db::{Database, format_timestamp};

struct SampleAccount {
    username: &'static str,
    member_since: &'static str,
}

struct SamplePost {
    title: &'static str,
    content: &'static str,
    author: &'static str,
    timestamp: &'static str,
    likes: usize,
}

const SAMPLE_ACCOUNTS: &[SampleAccount] = &[
    SampleAccount { username: "soma_k", member_since: "2024-01-01 12:00:00" },
    SampleAccount { username: "alex_m", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "emily_r", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "john_d", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "Sophia", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "Michael", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "Oliver", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "lily_p", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "james_w", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "Amelia", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "ethan_b", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "Isabella", member_since: "2024-01-02 12:00:00" },
    SampleAccount { username: "liam_o", member_since: "2024-01-02 12:00:00" },
];

const SAMPLE_POSTS: &[SamplePost] = &[
    SamplePost {
        title: "Frankenstein: the 1818 Text",
        content: "I read this book in English class with my friends, and I always got excited when I picked it up. An interesting tale that resonates through the ages.",
        author: "alex_m",
        timestamp: "2024-01-01 12:30:00",
        likes: 0,
    },
    SamplePost {
        title: "And The Mountains Echoed",
        content: "This is my favorite book. One of the first books I read in English. I highly recommend it, and it will make you very emotional!",
        author: "soma_k",
        timestamp: "2024-01-02 12:30:00",
        likes: 0,
    },
    SamplePost {
        title: "Pride and Prejudice",
        content: "A classic novel with wit and romance. The characters are timeless, and the social commentary is still relevant today.",
        author: "emily_r",
        timestamp: "2024-02-14 15:45:00",
        likes: 5,
    },
    SamplePost {
        title: "1984",
        content: "A thought-provoking and chilling dystopian novel. It's a warning of what could happen when power is left unchecked.",
        author: "john_d",
        timestamp: "2024-03-22 09:20:00",
        likes: 12,
    },
    SamplePost {
        title: "To Kill a Mockingbird",
        content: "An impactful story about justice and morality. It explores deep themes and evokes a strong sense of empathy.",
        author: "Sophia",
        timestamp: "2024-04-10 18:30:00",
        likes: 7,
    },
    SamplePost {
        title: "The Great Gatsby",
        content: "A beautifully written tragedy about the American Dream. The imagery and symbolism make it a powerful read.",
        author: "Michael",
        timestamp: "2024-05-05 11:00:00",
        likes: 3,
    },
    SamplePost {
        title: "Moby-Dick",
        content: "An epic tale of obsession and revenge. The narrative is complex and rich with symbolism.",
        author: "Oliver",
        timestamp: "2024-06-15 08:50:00",
        likes: 8,
    },
    SamplePost {
        title: "Jane Eyre",
        content: "A gripping novel with strong characters and a deeply emotional story. The journey of the protagonist is inspiring.",
        author: "lily_p",
        timestamp: "2024-07-21 14:35:00",
        likes: 4,
    },
    SamplePost {
        title: "The Catcher in the Rye",
        content: "A raw and honest portrayal of teenage angst and rebellion. It captures the complexities of adolescence perfectly.",
        author: "james_w",
        timestamp: "2024-08-10 17:20:00",
        likes: 6,
    },
    SamplePost {
        title: "Brave New World",
        content: "A haunting vision of a controlled, conformist society. The themes of freedom and individuality are thought-provoking.",
        author: "Amelia",
        timestamp: "2024-09-03 10:45:00",
        likes: 10,
    },
    SamplePost {
        title: "The Hobbit",
        content: "A delightful adventure with rich world-building and memorable characters. It's a timeless tale of courage and friendship.",
        author: "ethan_b",
        timestamp: "2024-10-27 19:15:00",
        likes: 11,
    },
    SamplePost {
        title: "Crime and Punishment",
        content: "A profound exploration of morality and redemption. The psychological depth of the characters is remarkable.",
        author: "Isabella",
        timestamp: "2024-11-12 13:25:00",
        likes: 9,
    },
    SamplePost {
        title: "Wuthering Heights",
        content: "A dark and passionate story of love and revenge. The atmosphere and characters are intensely compelling.",
        author: "liam_o",
        timestamp: "2024-12-05 07:30:00",
        likes: 5,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub accounts: usize,
    pub posts: usize,
    pub likes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Populated(SeedSummary),
    AlreadySeeded,
}

/// Insert the sample accounts and posts. Like counts are produced by real
/// likes from other sample accounts, so every counter matches its like rows.
pub fn populate(db: &Database) -> anyhow::Result<SeedOutcome> {
    if db.find_account_by_username(SAMPLE_ACCOUNTS[0].username)?.is_some() {
        return Ok(SeedOutcome::AlreadySeeded);
    }

    let mut accounts = Vec::with_capacity(SAMPLE_ACCOUNTS.len());
    for sample in SAMPLE_ACCOUNTS {
        let identity_key = pseudonymous_key(&format!("sample:{}", sample.username));
        let member_since = stored_timestamp(sample.member_since)?;
        accounts.push(db.create_account(sample.username, &identity_key, None, &member_since)?);
    }

    let mut likes = 0;
    for sample in SAMPLE_POSTS {
        let timestamp = stored_timestamp(sample.timestamp)?;
        let post = db.create_post(sample.title, sample.content, sample.author, &timestamp)?;

        let fans = accounts
            .iter()
            .filter(|account| account.username != sample.author)
            .take(sample.likes);
        for fan in fans {
            if db.like_post(fan.id, post.id)? == LikeOutcome::Liked {
                likes += 1;
            }
        }
    }

    let summary = SeedSummary {
        accounts: accounts.len(),
        posts: SAMPLE_POSTS.len(),
        likes,
    };
    info!(
        accounts = summary.accounts,
        posts = summary.posts,
        likes = summary.likes,
        "Database populated with sample data"
    );
    Ok(SeedOutcome::Populated(summary))
}

fn stored_timestamp(raw: &str) -> anyhow::Result<String> {
    let at = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("bad sample timestamp {}", raw))?;
    Ok(format_timestamp(at.and_utc()))
}
