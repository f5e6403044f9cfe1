use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{LimitExceeded, TryRecvError},
    event::{Event, EventName, EventPayload},
    listener::ListenerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConsumerId(pub(crate) u64);

/// Пишущая сторона одного pull-потребителя.
///
/// Читающая сторона живёт в хэндле у внешнего кода; переход потребителя
/// в закрытое состояние — это удаление записи (и тем самым `Sender`) из
/// реестра. Буферизованные нагрузки при этом остаются читаемыми.
pub(crate) struct ConsumerEntry<T> {
    pub(crate) id: ConsumerId,
    pub(crate) tx: mpsc::Sender<T>,
}

/// Реестр pull-потребителей: списки отправителей по имени события плюс
/// отдельный список глобальных потребителей. Порядок вставки определяет
/// порядок доставки внутри одного вызова `emit`.
pub(crate) struct ConsumerSet<N, P> {
    by_name: HashMap<N, Vec<ConsumerEntry<P>>>,
    global: Vec<ConsumerEntry<Event<N, P>>>,
}

impl<N: EventName, P: EventPayload> ConsumerSet<N, P> {
    pub(crate) fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            global: Vec::new(),
        }
    }

    /// Добавляет потребителя имени `name`. Лимит проверяется до вставки.
    pub(crate) fn add(
        &mut self,
        name: N,
        tx: mpsc::Sender<P>,
        id: ConsumerId,
        limit: usize,
    ) -> Result<(), LimitExceeded> {
        if limit != 0 && self.by_name.get(&name).map_or(0, Vec::len) >= limit {
            return Err(LimitExceeded { limit });
        }
        self.by_name
            .entry(name)
            .or_default()
            .push(ConsumerEntry { id, tx });
        Ok(())
    }

    /// Добавляет глобального потребителя.
    pub(crate) fn add_global(
        &mut self,
        tx: mpsc::Sender<Event<N, P>>,
        id: ConsumerId,
        limit: usize,
    ) -> Result<(), LimitExceeded> {
        if limit != 0 && self.global.len() >= limit {
            return Err(LimitExceeded { limit });
        }
        self.global.push(ConsumerEntry { id, tx });
        Ok(())
    }

    /// Текущие отправители имени `name`, в порядке регистрации.
    ///
    /// Возвращает клоны: доставка идёт без удержания замка реестра.
    pub(crate) fn senders(&self, name: &N) -> Vec<(ConsumerId, mpsc::Sender<P>)> {
        self.by_name.get(name).map_or_else(Vec::new, |list| {
            list.iter().map(|c| (c.id, c.tx.clone())).collect()
        })
    }

    /// Текущие глобальные отправители, в порядке регистрации.
    pub(crate) fn global_senders(&self) -> Vec<(ConsumerId, mpsc::Sender<Event<N, P>>)> {
        self.global.iter().map(|c| (c.id, c.tx.clone())).collect()
    }

    /// Закрывает и удаляет всех потребителей имени `name`.
    pub(crate) fn close_name(&mut self, name: &N) {
        self.by_name.remove(name);
    }

    /// Закрывает и удаляет всех потребителей, включая глобальных.
    pub(crate) fn close_all(&mut self) {
        self.by_name.clear();
        self.global.clear();
    }

    /// Удаляет записи имени `name`, чья читающая сторона брошена.
    pub(crate) fn prune(&mut self, name: &N, dead: &[ConsumerId]) {
        if let Some(list) = self.by_name.get_mut(name) {
            list.retain(|c| !dead.contains(&c.id));
            if list.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    /// То же для глобального списка.
    pub(crate) fn prune_global(&mut self, dead: &[ConsumerId]) {
        self.global.retain(|c| !dead.contains(&c.id));
    }

    pub(crate) fn count(&self, name: &N) -> usize {
        self.by_name.get(name).map_or(0, Vec::len)
    }

    pub(crate) fn global_count(&self) -> usize {
        self.global.len()
    }
}

/// Pull-подписка на события одного имени.
///
/// Ленивая однопроходная последовательность нагрузок: каждый `recv`
/// выдаёт следующую нагрузку в порядке эмиссии. Когда эмиттер закрывает
/// потребителя (`off`/`off_all`) или уничтожается сам, последовательность
/// заканчивается: буфер дочитывается, затем `recv` возвращает `None`.
///
/// Отписка происходит автоматически при `Drop`.
pub struct Subscription<P> {
    pub(crate) rx: mpsc::Receiver<P>,
}

impl<P: EventPayload> Subscription<P> {
    /// Асинхронно ожидает следующую нагрузку.
    ///
    /// # Возвращает
    /// - `Some(payload)` при получении очередного события
    /// - `None`, когда потребитель закрыт и буфер дочитан
    pub async fn recv(&mut self) -> Option<P> {
        self.rx.recv().await
    }

    /// Пытается получить нагрузку без ожидания.
    ///
    /// # Возвращает
    /// - `Ok(payload)`, если событие уже в буфере
    /// - `Err(TryRecvError::Empty)`, если буфер пуст
    /// - `Err(TryRecvError::Closed)`, если потребитель закрыт и дочитан
    pub fn try_recv(&mut self) -> Result<P, TryRecvError> {
        self.rx.try_recv().map_err(Into::into)
    }

    /// Возвращает количество нагрузок в буфере.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Проверяет, пуст ли буфер.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Явно завершить подписку. Аналогично `drop(self)`.
    pub fn unsubscribe(self) {
        // При drop Receiver'а эмиттер уберёт запись при следующей доставке
    }
}

impl<P: EventPayload> Stream for Subscription<P> {
    type Item = P;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<P>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Pull-подписка на все события эмиттера.
///
/// Выдаёт пары [`Event`] «имя + нагрузка» для каждой эмиссии любого имени,
/// в порядке эмиссии. Семантика завершения та же, что у [`Subscription`].
pub struct GlobalSubscription<N, P> {
    pub(crate) rx: mpsc::Receiver<Event<N, P>>,
}

impl<N: EventName, P: EventPayload> GlobalSubscription<N, P> {
    /// Асинхронно ожидает следующее событие.
    pub async fn recv(&mut self) -> Option<Event<N, P>> {
        self.rx.recv().await
    }

    /// Пытается получить событие без ожидания.
    pub fn try_recv(&mut self) -> Result<Event<N, P>, TryRecvError> {
        self.rx.try_recv().map_err(Into::into)
    }

    /// Возвращает количество событий в буфере.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Проверяет, пуст ли буфер.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Явно завершить подписку. Аналогично `drop(self)`.
    pub fn unsubscribe(self) {}
}

impl<N: EventName, P: EventPayload> Stream for GlobalSubscription<N, P> {
    type Item = Event<N, P>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event<N, P>>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Future следующей эмиссии одного имени.
///
/// Создаётся через [`Emitter::wait_for`](crate::Emitter::wait_for) поверх
/// внутреннего one-shot слушателя. Разрешается в `Some(payload)` на первой
/// же эмиссии, либо в `None`, если слушатель был снят (`remove_listener`,
/// `off`, `off_all`) или эмиттер уничтожен до эмиссии.
pub struct NextEvent<P> {
    pub(crate) id: ListenerId,
    pub(crate) rx: oneshot::Receiver<P>,
}

impl<P> NextEvent<P> {
    /// Токен внутреннего слушателя; им future можно отменить через
    /// [`Emitter::remove_listener`](crate::Emitter::remove_listener).
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl<P> Future for NextEvent<P> {
    type Output = Option<P>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(Result::ok)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::time::timeout;

    use super::*;

    /// Тест проверяет, что подписка читает отправленное в порядке записи.
    #[tokio::test]
    async fn test_subscription_recv_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription { rx };

        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();

        assert_eq!(sub.recv().await, Some("a"));
        assert_eq!(sub.recv().await, Some("b"));
    }

    /// Тест проверяет `try_recv`: Empty на пустом буфере, Closed после
    /// закрытия и дочитывания.
    #[tokio::test]
    async fn test_subscription_try_recv() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::<u32> { rx };

        assert_eq!(sub.try_recv(), Err(TryRecvError::Empty));

        tx.send(7).await.unwrap();
        drop(tx);

        // буфер дочитывается даже после закрытия
        assert_eq!(sub.try_recv(), Ok(7));
        assert_eq!(sub.try_recv(), Err(TryRecvError::Closed));
    }

    /// Тест проверяет, что закрытие будит ожидающего читателя
    /// концом последовательности, а не ошибкой.
    #[tokio::test]
    async fn test_close_wakes_pending_reader() {
        let (tx, rx) = mpsc::channel::<u32>(1);
        let mut sub = Subscription { rx };

        let reader = tokio::spawn(async move { sub.recv().await });
        drop(tx);

        let got = timeout(Duration::from_millis(100), reader)
            .await
            .expect("timed out")
            .expect("join failed");
        assert_eq!(got, None);
    }

    /// Тест проверяет, что подписка работает как Stream.
    #[tokio::test]
    async fn test_subscription_as_stream() {
        let (tx, rx) = mpsc::channel(4);
        let sub = Subscription { rx };

        tx.send(1u32).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        let collected: Vec<u32> = sub.collect().await;
        assert_eq!(collected, vec![1, 2]);
    }

    /// Тест проверяет, что `unsubscribe` бросает читающую сторону.
    #[tokio::test]
    async fn test_unsubscribe_drops_receiver() {
        let (tx, rx) = mpsc::channel::<u32>(1);
        let sub = Subscription { rx };

        sub.unsubscribe();
        assert!(tx.is_closed());
    }

    /// Тест проверяет лимит и порядок в реестре потребителей.
    #[tokio::test]
    async fn test_consumer_set_limit_and_order() {
        let mut set: ConsumerSet<&str, u32> = ConsumerSet::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let (tx3, _rx3) = mpsc::channel(1);

        set.add("ev", tx1, ConsumerId(1), 2).unwrap();
        set.add("ev", tx2, ConsumerId(2), 2).unwrap();
        let err = set.add("ev", tx3, ConsumerId(3), 2).unwrap_err();
        assert_eq!(err, LimitExceeded { limit: 2 });

        let ids: Vec<u64> = set.senders(&"ev").iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    /// Тест проверяет, что `close_name` бросает отправителей ровно
    /// одного имени.
    #[tokio::test]
    async fn test_close_name_is_targeted() {
        let mut set: ConsumerSet<&str, u32> = ConsumerSet::new();
        let (tx_a, rx_a) = mpsc::channel(1);
        let (tx_b, rx_b) = mpsc::channel(1);
        set.add("a", tx_a, ConsumerId(1), 0).unwrap();
        set.add("b", tx_b, ConsumerId(2), 0).unwrap();

        set.close_name(&"a");

        let mut sub_a = Subscription::<u32> { rx: rx_a };
        let mut sub_b = Subscription::<u32> { rx: rx_b };
        assert_eq!(sub_a.recv().await, None);
        assert_eq!(set.count(&"b"), 1);

        for (_, tx) in set.senders(&"b") {
            tx.send(5).await.unwrap();
        }
        assert_eq!(sub_b.recv().await, Some(5));
    }

    /// Тест проверяет выбраковку записей с брошенным читателем.
    #[tokio::test]
    async fn test_prune_removes_dead_entries() {
        let mut set: ConsumerSet<&str, u32> = ConsumerSet::new();
        let (tx1, rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        set.add("ev", tx1, ConsumerId(1), 0).unwrap();
        set.add("ev", tx2, ConsumerId(2), 0).unwrap();

        drop(rx1);
        set.prune(&"ev", &[ConsumerId(1)]);

        let ids: Vec<u64> = set.senders(&"ev").iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![2]);
    }

    /// Тест проверяет, что `NextEvent` разрешается в `None`, когда
    /// отправляющая сторона брошена без значения.
    #[tokio::test]
    async fn test_next_event_resolves_none_on_drop() {
        let (tx, rx) = oneshot::channel::<u32>();
        let next = NextEvent {
            id: ListenerId(1),
            rx,
        };

        drop(tx);
        assert_eq!(next.await, None);
    }

    /// Тест проверяет, что `NextEvent` выдаёт отправленное значение.
    #[tokio::test]
    async fn test_next_event_resolves_value() {
        let (tx, rx) = oneshot::channel();
        let next = NextEvent {
            id: ListenerId(1),
            rx,
        };

        tx.send(42u32).unwrap();
        assert_eq!(next.await, Some(42));
    }
}
