/// Picks the entry that should be evicted to make room for a new one.
///
/// Given `(slot, decay)` pairs, returns the slot with the highest decay (i.e.
/// the least recently used one) among those whose decay is at least
/// `min_decay`; ties are broken in favor of the lowest slot.
///
/// Returns `None` when every entry is still hot.
pub fn select_lru_victim(
    entries: impl IntoIterator<Item = (u32, u32)>,
    min_decay: u32,
) -> Option<u32> {
    let mut victim: Option<(u32, u32)> = None;

    for (slot, decay) in entries {
        if decay < min_decay {
            continue;
        }

        let is_better = match victim {
            Some((victim_slot, victim_decay)) => {
                decay > victim_decay
                    || (decay == victim_decay && slot < victim_slot)
            }
            None => true,
        };

        if is_better {
            victim = Some((slot, decay));
        }
    }

    victim.map(|(slot, _)| slot)
}
